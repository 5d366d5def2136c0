//! # skiff-core
//!
//! Protocol-neutral building blocks shared by every skiff session: the path
//! and host model, the error taxonomy, listeners, preferences, the feature
//! catalogue with its typed lookup, the `Session` trait with its lifecycle
//! helper, the protocol catalog and background workers.

pub mod archive;
pub mod date;
pub mod error;
pub mod feature;
pub mod host;
pub mod listener;
pub mod locale;
pub mod metadata;
pub mod path;
pub mod preferences;
pub mod protocol;
pub mod session;
pub mod tooltip;
pub mod transfer;
pub mod url;
pub mod worker;

pub use error::{BackgroundError, BackgroundResult, ErrorKind};
pub use feature::{Feature, FeatureDecorator, FeatureKind, FeatureType};
pub use host::{Credentials, FtpConnectMode, Host, Protocol};
pub use path::{AttributedList, Path, PathAttributes, PathType, Permission};
pub use preferences::Preferences;
pub use protocol::{ProtocolCatalog, SessionFactory};
pub use session::{
    get_feature, get_feature_or, ConnectionState, Session, SessionContext, SessionCore,
    SessionId,
};
