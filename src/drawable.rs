// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Presentable render targets.

use crate::resource::Texture;
use std::sync::atomic::{AtomicUsize, Ordering};

/**
Something a command buffer can present once its work has completed.

`present` is called on the queue's timeline thread, after every pass of the command buffer
that presented it has finished without error.
*/
pub trait Drawable: Send + Sync {
    fn texture(&self) -> &Texture;
    fn present(&self);
}

/// A drawable backed by a plain texture.  Presenting only counts.
#[derive(Debug)]
pub struct OffscreenDrawable {
    texture: Texture,
    presented: AtomicUsize,
}

impl OffscreenDrawable {
    pub fn new(texture: Texture) -> Self {
        OffscreenDrawable {
            texture,
            presented: AtomicUsize::new(0),
        }
    }

    pub fn present_count(&self) -> usize {
        self.presented.load(Ordering::Acquire)
    }
}

impl Drawable for OffscreenDrawable {
    fn texture(&self) -> &Texture {
        &self.texture
    }

    fn present(&self) {
        self.presented.fetch_add(1, Ordering::AcqRel);
    }
}
