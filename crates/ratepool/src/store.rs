//! Token store: the bounded buffer of admission tokens.
//!
//! The store is a bounded tokio channel. The sending half is owned by the
//! occupancy ledger, which is the only place tokens are minted; the
//! receiving half is shared by every waiting caller.
//!
//! A closed store is reported as `None`, never as a token. Callers cannot
//! construct a `Token` themselves, so the only way to hold one is to have
//! received it from a live store.

use tokio::sync::{Mutex, mpsc};

/// One unit of admission permission.
#[derive(Debug)]
pub(crate) struct Token {
    _private: (),
}

impl Token {
    pub(crate) fn mint() -> Self {
        Self { _private: () }
    }
}

/// Create a store holding at most `capacity` tokens.
pub(crate) fn token_store(capacity: usize) -> (mpsc::Sender<Token>, TokenStore) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        TokenStore {
            rx: Mutex::new(rx),
        },
    )
}

/// Receiving side of the store.
///
/// Waiters queue on the mutex and then on the channel. Both waits are
/// cancel safe: dropping a pending [`TokenStore::take`] never loses a token.
pub(crate) struct TokenStore {
    rx: Mutex<mpsc::Receiver<Token>>,
}

impl TokenStore {
    /// Wait for a token. Returns `None` once the store is closed and drained.
    pub(crate) async fn take(&self) -> Option<Token> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Take a token only if one is resident right now.
    ///
    /// Returns `None` if the store is empty, closed, or another caller is
    /// currently receiving.
    pub(crate) fn try_take(&self) -> Option<Token> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn tokens_flow_through_the_store() {
        let (tx, store) = token_store(2);
        tx.try_send(Token::mint()).unwrap();
        tx.try_send(Token::mint()).unwrap();
        assert!(tx.try_send(Token::mint()).is_err());

        assert!(store.take().await.is_some());
        assert!(store.try_take().is_some());
        assert!(store.try_take().is_none());
    }

    #[tokio::test]
    async fn closed_store_yields_none() {
        let (tx, store) = token_store(1);
        drop(tx);
        assert!(store.take().await.is_none());
        assert!(store.try_take().is_none());
    }

    #[tokio::test]
    async fn buffered_tokens_survive_close() {
        let (tx, store) = token_store(1);
        tx.try_send(Token::mint()).unwrap();
        drop(tx);
        assert!(store.take().await.is_some());
        assert!(store.take().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_take_does_not_lose_a_token() {
        let (tx, store) = token_store(1);

        let waited = tokio::time::timeout(Duration::from_millis(10), store.take()).await;
        assert!(waited.is_err());

        tx.try_send(Token::mint()).unwrap();
        assert!(store.try_take().is_some());
    }

    #[tokio::test]
    async fn waiter_wakes_when_store_closes() {
        let (tx, store) = token_store(1);
        let store = std::sync::Arc::new(store);

        let waiter = tokio::spawn({
            let store = std::sync::Arc::clone(&store);
            async move { store.take().await.is_none() }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);
        assert!(waiter.await.unwrap());
    }
}
