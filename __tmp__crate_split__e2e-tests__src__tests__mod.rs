mod scenarios;
mod utils;


