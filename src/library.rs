// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Shader libraries and their functions.

A [`Library`] is compiled once from source.  Every [`Function`] looked up from it shares the
checked module, so building many pipelines from one library does not recompile anything.
*/

use crate::device::{Device, DeviceShared};
use crate::error::{CompileError, FunctionError};
use crate::shader::{self, ast};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

/// Shading language revisions, encoded as `major << 16 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LanguageVersion {
    V1_0 = 0x10000,
    V1_1 = 0x10001,
    V1_2 = 0x10002,
    V2_0 = 0x20000,
    V2_1 = 0x20001,
    V2_2 = 0x20002,
    V2_3 = 0x20003,
    V2_4 = 0x20004,
    V3_0 = 0x30000,
    V3_1 = 0x30001,
}

impl LanguageVersion {
    pub const LATEST: LanguageVersion = LanguageVersion::V3_1;

    pub fn from_raw(raw: u64) -> Option<Self> {
        use LanguageVersion::*;
        [V1_0, V1_1, V1_2, V2_0, V2_1, V2_2, V2_3, V2_4, V3_0, V3_1]
            .into_iter()
            .find(|v| *v as u64 == raw)
    }

    pub fn raw(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub fast_math_enabled: bool,
    pub preserve_invariance: bool,
    /// `None` compiles against [`LanguageVersion::LATEST`].
    pub language_version: Option<LanguageVersion>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            fast_math_enabled: true,
            preserve_invariance: false,
            language_version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionType {
    Vertex = 1,
    Fragment = 2,
    Kernel = 3,
}

impl From<ast::Stage> for FunctionType {
    fn from(stage: ast::Stage) -> Self {
        match stage {
            ast::Stage::Kernel => FunctionType::Kernel,
            ast::Stage::Vertex => FunctionType::Vertex,
            ast::Stage::Fragment => FunctionType::Fragment,
        }
    }
}

struct LibraryShared {
    module: Arc<ast::Module>,
    device: Weak<DeviceShared>,
    device_id: u64,
    options: CompileOptions,
}

/// A compiled shader module.
#[derive(Clone)]
pub struct Library {
    shared: Arc<LibraryShared>,
}

impl Debug for Library {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("functions", &self.function_names())
            .finish()
    }
}

impl Library {
    pub(crate) fn new(
        device: &Device,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Self, CompileError> {
        let module = shader::compile(source).map_err(|diagnostic| CompileError {
            diagnostics: diagnostic.to_string(),
        })?;
        logwise::info_sync!(
            "compiled library with {count} functions",
            count = module.functions.len()
        );
        Ok(Library {
            shared: Arc::new(LibraryShared {
                module: Arc::new(module),
                device: device.downgrade(),
                device_id: device.id(),
                options: *options,
            }),
        })
    }

    pub fn device(&self) -> Option<Device> {
        Device::upgrade(&self.shared.device)
    }

    pub fn options(&self) -> CompileOptions {
        self.shared.options
    }

    /// Names of the entry points, in declaration order.  Helpers are not listed.
    pub fn function_names(&self) -> Vec<String> {
        self.shared
            .module
            .functions
            .iter()
            .filter(|f| f.stage.is_some())
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn new_function_with_name(&self, name: &str) -> Result<Function, FunctionError> {
        let module = &self.shared.module;
        let entry = module
            .entry_point(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;
        let stage = module.functions[entry]
            .stage
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;
        Ok(Function {
            module: module.clone(),
            entry,
            name: name.to_string(),
            function_type: stage.into(),
            device: self.shared.device.clone(),
            device_id: self.shared.device_id,
        })
    }
}

/// One entry point of a [`Library`].
#[derive(Clone)]
pub struct Function {
    module: Arc<ast::Module>,
    entry: usize,
    name: String,
    function_type: FunctionType,
    device: Weak<DeviceShared>,
    device_id: u64,
}

impl Debug for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("function_type", &self.function_type)
            .finish()
    }
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }

    pub fn device(&self) -> Option<Device> {
        Device::upgrade(&self.device)
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub(crate) fn module(&self) -> &Arc<ast::Module> {
        &self.module
    }

    pub(crate) fn entry(&self) -> usize {
        self.entry
    }

    pub(crate) fn declaration(&self) -> &ast::Function {
        &self.module.functions[self.entry]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_system_default_device;

    const SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

float twice(float x) { return x * 2.0; }

kernel void scale(device float* data [[buffer(0)]], uint id [[thread_position_in_grid]]) {
    data[id] = twice(data[id]);
}

vertex float4 vert(uint vid [[vertex_id]]) {
    return float4(0.0, 0.0, 0.0, 1.0);
}
"#;

    #[test]
    fn lists_entry_points_only() {
        let device = create_system_default_device().unwrap();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        assert_eq!(library.function_names(), ["scale", "vert"]);
        let scale = library.new_function_with_name("scale").unwrap();
        assert_eq!(scale.function_type(), FunctionType::Kernel);
        assert_eq!(
            library.new_function_with_name("vert").unwrap().function_type(),
            FunctionType::Vertex
        );
        assert_eq!(
            library.new_function_with_name("twice").unwrap_err(),
            FunctionError::NotFound("twice".into())
        );
        assert_eq!(scale.device(), Some(device));
    }

    #[test]
    fn compile_errors_are_diagnostics() {
        let device = create_system_default_device().unwrap();
        let err = device
            .new_library_with_source("kernel void f() { x = 1; }", &CompileOptions::default())
            .unwrap_err();
        assert!(err.diagnostics.starts_with("program_source:1:"));
        assert!(err.diagnostics.contains("error: use of undeclared identifier 'x'"));
    }

    #[test]
    fn language_versions() {
        assert_eq!(LanguageVersion::from_raw(0x20004), Some(LanguageVersion::V2_4));
        assert_eq!(LanguageVersion::from_raw(0x20005), None);
        assert_eq!(LanguageVersion::LATEST.raw(), 0x30001);
        assert!(CompileOptions::default().fast_math_enabled);
    }
}
