pub mod arc4;
pub mod bignum;
pub mod digest;
pub mod session_crypt;
