pub mod context;
pub mod github;
pub mod limits;
pub mod mailer;
pub mod provisioning;
pub mod sessions;
pub mod verification;
