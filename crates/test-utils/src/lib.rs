//! Test helpers shared by notiflow's integration suites.

pub mod db;
