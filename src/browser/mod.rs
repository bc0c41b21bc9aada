pub mod driver;
pub mod mock;
pub mod profile;
pub mod types;

pub use driver::{BrowserLauncher, BrowserSession, bounded};
pub use mock::{MockAction, MockBrowser, MockCall, MockElement};
pub use profile::{
    ProfileInjectionReport, StorageArea, element_presence_script, export_profile, inject_profile,
    text_presence_script,
};
pub use types::{
    BrowserError, BrowserKind, BrowserProfileData, BrowserResult, Cookie, PageSnapshot, is_restricted_url,
};
