pub mod fence;
pub mod text;
