#[macro_use]
extern crate serde;

mod ballot;
mod ceremony;
mod decryption;
pub mod ecies;
mod election;
mod elgamal;
mod error;
mod file_repository;
mod group;
mod keygen;
mod proof;
mod repository;
mod scheduler;
mod serde_hex;
mod settings;
mod store;
mod tally;

pub use ballot::*;
pub use ceremony::*;
pub use decryption::*;
pub use ecies::{EciesPublicKey, EciesSecretKey};
pub use election::*;
pub use elgamal::*;
pub use error::*;
pub use file_repository::*;
pub use group::*;
pub use keygen::*;
pub use proof::*;
pub use repository::*;
pub use scheduler::*;
pub use serde_hex::*;
pub use settings::*;
pub use store::*;
pub use tally::*;
