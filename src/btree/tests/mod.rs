pub mod helpers;

mod tests_pagefile;
mod tests_wal;
