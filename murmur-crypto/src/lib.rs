pub mod encryption;
pub mod envelope;
pub mod hash;
pub mod identity;
pub mod keys;
pub mod sealing;
