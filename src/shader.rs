// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The shading-language front end and interpreter used by the software device.

The accepted language is a subset of the Metal Shading Language: scalar and vector arithmetic,
structs, `device`/`constant` pointers and references, the usual control flow, a handful of
math built-ins and user helper functions.  Source goes through [`compile`] once, when a library
is created; the checked [`ast::Module`] is then shared by every pipeline built from it and run
by the [`interp`] module on the device timeline.

Diagnostics use the compiler's `program_source:LINE:COL: error: message` shape so that
callers which grep compiler output keep working.
*/

pub(crate) mod ast;
mod check;
pub(crate) mod interp;
mod lexer;
mod parser;

use std::fmt::{Display, Formatter};

pub(crate) use check::MAX_BUFFER_INDEX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub(crate) line: u32,
    pub(crate) col: u32,
    pub(crate) message: String,
}

impl Diagnostic {
    pub(crate) fn new(line: u32, col: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            col,
            message: message.into(),
        }
    }

    pub(crate) fn at(pos: ast::Pos, message: impl Into<String>) -> Self {
        Self::new(pos.line, pos.col, message)
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "program_source:{}:{}: error: {}",
            self.line, self.col, self.message
        )
    }
}

/// Lexes, parses and checks `source`.
pub(crate) fn compile(source: &str) -> Result<ast::Module, Diagnostic> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let mut module = parser::Parser::new(tokens).parse_module()?;
    check::check_module(&mut module)?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_format() {
        let err = compile("kernel void f() {\n  undeclared = 1;\n}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "program_source:2:3: error: use of undeclared identifier 'undeclared'"
        );
    }

    #[test]
    fn compiles_a_typical_kernel() {
        let module = compile(
            r"
#include <metal_stdlib>
using namespace metal;

kernel void add_arrays(device const float* a [[buffer(0)]],
                       device const float* b [[buffer(1)]],
                       device float* out [[buffer(2)]],
                       uint index [[thread_position_in_grid]]) {
    out[index] = a[index] + b[index];
}
",
        )
        .unwrap();
        let f = &module.functions[module.entry_point("add_arrays").unwrap()];
        assert_eq!(f.buffer_indices().collect::<Vec<_>>(), [0, 1, 2]);
    }
}
