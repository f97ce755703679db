//! Reset-key vault: ten recovery slots, each wrapping the data key.

use crate::error::{VaultError, VaultResult};
use docseal_crypto::{create_reset_doc, generate_reset_key, open_reset_doc, DerivedKey, KdfParams};
use docseal_storage::{DocumentStore, IdRange};
use docseal_types::{is_reset_doc_id, reset_doc_id, Document, DocumentExt, RESET_DOC_PREFIX, RESET_KEY_COUNT};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use zeroize::Zeroizing;

async fn load_slots(store: &dyn DocumentStore) -> VaultResult<Vec<Document>> {
    Ok(store
        .find_all(&IdRange::prefix(RESET_DOC_PREFIX))
        .await?
        .into_iter()
        .filter(|doc| doc.id().is_some_and(is_reset_doc_id))
        .collect())
}

/// Builds every slot around `key`, returning the documents to write and
/// the recovery passwords in slot order. Slots that already exist keep
/// their revision so the write updates them in place.
pub(crate) async fn build_reset_slots(
    store: &dyn DocumentStore,
    key: &Arc<DerivedKey>,
    params: KdfParams,
) -> VaultResult<(Vec<Document>, Vec<String>)> {
    let revisions: HashMap<String, String> = load_slots(store)
        .await?
        .into_iter()
        .filter_map(|doc| Some((doc.id()?.to_string(), doc.rev()?.to_string())))
        .collect();

    let tasks = (0..RESET_KEY_COUNT).map(|index| {
        let key = Arc::clone(key);
        tokio::task::spawn_blocking(move || {
            let reset_key = generate_reset_key();
            create_reset_doc(index, &key, &reset_key, &params).map(|doc| (doc, reset_key))
        })
    });

    let mut docs = Vec::with_capacity(RESET_KEY_COUNT);
    let mut reset_keys = Vec::with_capacity(RESET_KEY_COUNT);
    for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
        let (mut doc, reset_key) = joined??;
        if let Some(rev) = revisions.get(&reset_doc_id(index)) {
            doc.set_rev(rev.clone());
        }
        docs.push(doc);
        reset_keys.push(reset_key);
    }
    Ok((docs, reset_keys))
}

/// Tries `candidate` against every stored slot and returns the data key
/// from the one it opens.
pub(crate) async fn recover_data_key(
    store: &dyn DocumentStore,
    candidate: &str,
    params: KdfParams,
) -> VaultResult<DerivedKey> {
    let candidate = Arc::new(Zeroizing::new(candidate.to_string()));
    let tasks = load_slots(store).await?.into_iter().map(|doc| {
        let candidate = Arc::clone(&candidate);
        tokio::task::spawn_blocking(move || (doc.id().map(str::to_string), open_reset_doc(&doc, &candidate, &params)))
    });

    for joined in join_all(tasks).await {
        match joined? {
            (_, Ok(key)) => return Ok(key),
            (_, Err(err)) if err.is_authentication() => {}
            (id, Err(err)) => warn!("Skipping unreadable reset key slot {:?}: {}", id, err),
        }
    }
    Err(VaultError::Unauthorized("reset key incorrect".to_string()))
}
