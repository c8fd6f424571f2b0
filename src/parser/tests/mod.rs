//! Parser tests, grouped by syntax category

mod declaration_tests;
mod expression_tests;
mod helpers;
mod printer_tests;
mod statement_tests;
