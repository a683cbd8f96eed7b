pub mod decrypt;
pub mod sign;
pub mod verify;
