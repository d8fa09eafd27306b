pub mod apply;
pub mod list;
