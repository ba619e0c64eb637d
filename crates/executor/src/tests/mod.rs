pub mod helpers;
mod macro_demo;
