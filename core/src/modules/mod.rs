pub mod discovery;
pub mod external;
pub mod jwt;
pub mod webapp;
