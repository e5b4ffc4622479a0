pub mod lockfile_tests;
pub mod locks_tests;
