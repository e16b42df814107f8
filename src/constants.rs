use std::borrow::Cow;
use std::sync::LazyLock;

use crate::protocol::ClientSdkInfo;

/// The version of the protocol the client speaks.
pub const PROTOCOL_VERSION: u16 = 7;

/// The version of this client.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The user agent the client reports itself as.
pub const USER_AGENT: &str = concat!("flare-rust/", env!("CARGO_PKG_VERSION"));

/// The default client metadata attached to outgoing payloads.
pub static SDK_INFO: LazyLock<Cow<'static, ClientSdkInfo>> = LazyLock::new(|| {
    Cow::Owned(ClientSdkInfo {
        name: "flare-rust".into(),
        version: VERSION.into(),
        integrations: Vec::new(),
        packages: Vec::new(),
    })
});
