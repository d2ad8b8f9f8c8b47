pub mod cones;
pub mod inspect;
pub mod run;
