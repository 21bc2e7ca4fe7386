pub mod account;
pub mod clients;
pub mod driver;
pub mod error;
pub mod password;
pub mod reconciler;
pub mod resource;
pub mod store;

pub use account::Account;
pub use clients::{AdminClient, AdminConnector, CallContext, ClientError, InMemoryCluster};
pub use driver::{Driver, Outcome};
pub use error::{ConnectStage, Error, ErrorKind, Result};
pub use password::{PasswordGenerator, RandomPassword};
pub use reconciler::{
    ConnectionDetails, Connector, ExternalClient, ExternalCreation, ExternalObservation,
    PASSWORD_KEY, UserConnector, UserSession,
};
pub use resource::{ProviderConfig, User};
pub use store::{
    ConnectionPublisher, InMemoryStore, ProviderConfigStore, SecretStore, StoreError, UsageTracker,
};
