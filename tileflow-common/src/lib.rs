#![no_std]

pub mod color;
pub mod display;
pub mod mode;
pub mod platform;
