pub mod xls_parser;
