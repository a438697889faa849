pub mod core;
pub mod expenses;
pub mod fees;
pub mod records;
pub mod remediation;
pub mod tenants;
