//! Assembly library for the Muster server binary.

#![deny(unsafe_code)]

pub mod setup;
