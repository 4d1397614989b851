pub mod audits;
pub mod instances;
pub mod learning;
pub mod messages;
pub mod protocols;
pub mod sequence;
pub mod surveys;
