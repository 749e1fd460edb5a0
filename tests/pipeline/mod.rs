mod collector;
mod failures;
mod runner;
