#![allow(dead_code)]

pub use pipedag_test_utils::*;
