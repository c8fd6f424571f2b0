mod helpers;

mod run_tests;
mod tool_tests;
