pub mod detect;
pub mod firewall;
pub mod report;
pub mod revive;
pub mod setup;
pub mod validate;
