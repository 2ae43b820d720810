pub mod check;
pub mod pattern;
pub mod run;
