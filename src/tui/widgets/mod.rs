//! Custom widgets for the run view

mod output_view;

pub use output_view::*;
