pub mod range_reader;
