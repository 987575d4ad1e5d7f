//! Protocol interface layouts provided by the emulator.

pub mod gop;
pub mod loaded_image;
pub mod simple_text;
pub mod simple_text_input;
