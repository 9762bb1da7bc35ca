mod helpers;

mod generator_tests;
mod serialize_tests;
