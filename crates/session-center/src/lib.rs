//! Session lifecycle for browser-fronted targets.
//!
//! [`SessionManager`] keeps one authenticated page per target identity. It
//! classifies what the page shows ([`LoginClassifier`]), tries a silent SSO
//! ([`AutoSsoDriver`]) and falls back to an operator through an
//! [`InteractionChannel`] when the identity provider insists on interaction.

pub mod auto_sso;
pub mod classifier;
pub mod credential;
pub mod interaction;
pub mod manager;
pub mod model;

pub use auto_sso::{dismiss_popups, AutoSsoDriver, AutoSsoSettings, SsoOutcome};
pub use classifier::LoginClassifier;
pub use credential::{CredentialHandle, CredentialStore, CredentialStoreError, SessionMarker};
pub use interaction::{HumanSignal, InteractionChannel, TerminalPrompt};
pub use manager::{SessionGuard, SessionHandle, SessionManager};
pub use model::{SessionPolicy, SessionRecord};
