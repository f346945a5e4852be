pub mod accident;
