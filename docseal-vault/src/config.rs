//! Store configuration.

use docseal_crypto::DocumentOptions;
use serde::{Deserialize, Serialize};

/// Options recognized by [`crate::CryptoStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CryptoConfig {
    /// Seal underscore-prefixed members instead of leaving them plaintext.
    pub handle_special_document_members: bool,
    /// Never write a password check into stores created without one.
    pub no_password_check_auto_fix: bool,
}

impl CryptoConfig {
    pub(crate) fn document_options(&self) -> DocumentOptions {
        DocumentOptions {
            handle_special_members: self.handle_special_document_members,
        }
    }
}
