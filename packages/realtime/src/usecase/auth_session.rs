//! UseCase: 有効なアクセストークンの取得
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - AuthSessionProvider::ensure_valid_token() メソッド
//! - セッションの有無と有効期限に応じた分岐（そのまま / リフレッシュ / 匿名サインイン）
//!
//! ### なぜこのテストが必要か
//! - 期限切れのトークンがトランスポートに渡らないことを保証
//! - 失敗した各経路が正しい AuthError に変換されることを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：有効なセッション、セッションなし → 匿名サインイン
//! - 異常系：リフレッシュ失敗、匿名サインイン失敗、取得直後なのに期限切れ
//! - エッジケース：exp がちょうど現在時刻、デコードできないトークン

use std::sync::Arc;

use tsunagi_shared::time::Clock;

use crate::domain::{AnonymousMetadata, AuthError, AuthToken, IdentityProvider, OrganizationId};

/// アクセストークンの供給元
///
/// キャッシュは持たず、呼び出しのたびに検証し直します。
pub struct AuthSessionProvider {
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    /// インスタンスごとに 1 度だけ生成される訪問者 ID
    visitor_id: String,
}

impl AuthSessionProvider {
    /// 新しい AuthSessionProvider を作成
    pub fn new(identity: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            identity,
            clock,
            visitor_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    /// 期限切れでないトークンを返す
    ///
    /// # Returns
    ///
    /// * `Ok(AuthToken)` - 現在時刻より後に期限が切れるトークン
    /// * `Err(AuthError)` - サインイン・リフレッシュの失敗、または取得したトークンが使えない
    pub async fn ensure_valid_token(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<AuthToken, AuthError> {
        let session = match self.identity.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Session lookup failed, signing in anonymously: {}", e);
                None
            }
        };

        let Some(session) = session else {
            let metadata = AnonymousMetadata {
                organization_id: organization_id.clone(),
                visitor_id: self.visitor_id.clone(),
            };
            let session = self
                .identity
                .sign_in_anonymously(metadata)
                .await
                .map_err(AuthError::AnonymousSignIn)?;
            return self.validate_fresh(&session.access_token);
        };

        let now = self.clock.now_epoch_seconds();
        match AuthToken::decode(&session.access_token) {
            Ok(token) if !token.is_expired_at(now) => return Ok(token),
            Ok(token) => tracing::debug!(
                "Session expired at {} (now {}), refreshing",
                token.expires_at_epoch_seconds,
                now
            ),
            Err(e) => tracing::debug!("Session token unreadable ({}), refreshing", e),
        }

        let session = self
            .identity
            .refresh_session()
            .await
            .map_err(AuthError::Refresh)?;
        self.validate_fresh(&session.access_token)
    }

    /// 取得直後のトークンを検証する
    fn validate_fresh(&self, value: &str) -> Result<AuthToken, AuthError> {
        let token = AuthToken::decode(value).map_err(AuthError::MalformedToken)?;
        let now = self.clock.now_epoch_seconds();
        if token.is_expired_at(now) {
            return Err(AuthError::Expired {
                expires_at: token.expires_at_epoch_seconds,
                now,
            });
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{IdentityError, Session, auth::MockIdentityProvider},
        testing::token_expiring_at,
    };
    use tsunagi_shared::time::FixedClock;

    const NOW: i64 = 1_700_000_000;

    fn org() -> OrganizationId {
        OrganizationId::new("O1").unwrap()
    }

    fn session(token: String) -> Session {
        Session {
            access_token: token,
        }
    }

    fn create_provider(identity: MockIdentityProvider) -> AuthSessionProvider {
        AuthSessionProvider::new(
            Arc::new(identity),
            Arc::new(FixedClock::at_epoch_seconds(NOW)),
        )
    }

    #[tokio::test]
    async fn test_valid_session_is_returned_as_is() {
        // テスト項目: 有効なセッションのトークンはリフレッシュせずに返される
        // given (前提条件):
        let raw = token_expiring_at(NOW + 3600);
        let expected = raw.clone();
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .times(1)
            .returning(move || Ok(Some(session(raw.clone()))));
        identity.expect_refresh_session().never();
        identity.expect_sign_in_anonymously().never();
        let provider = create_provider(identity);

        // when (操作):
        let token = provider.ensure_valid_token(&org()).await.unwrap();

        // then (期待する結果):
        assert_eq!(token.value, expected);
        assert_eq!(token.expires_at_epoch_seconds, NOW + 3600);
    }

    #[tokio::test]
    async fn test_missing_session_signs_in_anonymously() {
        // テスト項目: セッションがなければ組織 ID と訪問者 ID 付きで匿名サインインする
        // given (前提条件):
        let raw = token_expiring_at(NOW + 3600);
        let mut identity = MockIdentityProvider::new();
        identity.expect_get_session().returning(|| Ok(None));
        identity
            .expect_sign_in_anonymously()
            .times(1)
            .withf(|metadata| metadata.organization_id.as_str() == "O1" && !metadata.visitor_id.is_empty())
            .returning(move |_| Ok(session(raw.clone())));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_session_lookup_error_falls_back_to_anonymous_sign_in() {
        // テスト項目: セッション取得がエラーでも匿名サインインで回復する
        // given (前提条件):
        let raw = token_expiring_at(NOW + 60);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .returning(|| Err(IdentityError::Request("offline".to_string())));
        identity
            .expect_sign_in_anonymously()
            .times(1)
            .returning(move |_| Ok(session(raw.clone())));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert_eq!(result.unwrap().expires_at_epoch_seconds, NOW + 60);
    }

    #[tokio::test]
    async fn test_token_expiring_now_is_refreshed() {
        // テスト項目: exp が現在時刻と等しいトークンはリフレッシュされる
        // given (前提条件):
        let stale = token_expiring_at(NOW);
        let fresh = token_expiring_at(NOW + 3600);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .returning(move || Ok(Some(session(stale.clone()))));
        identity
            .expect_refresh_session()
            .times(1)
            .returning(move || Ok(session(fresh.clone())));
        let provider = create_provider(identity);

        // when (操作):
        let token = provider.ensure_valid_token(&org()).await.unwrap();

        // then (期待する結果):
        assert!(token.expires_at_epoch_seconds > NOW);
    }

    #[tokio::test]
    async fn test_undecodable_session_is_refreshed() {
        // テスト項目: デコードできないセッショントークンは期限切れとして扱われる
        // given (前提条件):
        let fresh = token_expiring_at(NOW + 3600);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .returning(|| Ok(Some(session("not-a-token".to_string()))));
        identity
            .expect_refresh_session()
            .times(1)
            .returning(move || Ok(session(fresh.clone())));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_error() {
        // テスト項目: リフレッシュの失敗は AuthError::Refresh になる
        // given (前提条件):
        let stale = token_expiring_at(NOW - 10);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .returning(move || Ok(Some(session(stale.clone()))));
        identity
            .expect_refresh_session()
            .returning(|| Err(IdentityError::NoSession));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert_eq!(result, Err(AuthError::Refresh(IdentityError::NoSession)));
    }

    #[tokio::test]
    async fn test_anonymous_sign_in_failure_is_auth_error() {
        // テスト項目: 匿名サインインの失敗は AuthError::AnonymousSignIn になる
        // given (前提条件):
        let mut identity = MockIdentityProvider::new();
        identity.expect_get_session().returning(|| Ok(None));
        identity.expect_sign_in_anonymously().returning(|_| {
            Err(IdentityError::Rejected {
                status: 422,
                message: "disabled".to_string(),
            })
        });
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(AuthError::AnonymousSignIn(_))));
    }

    #[tokio::test]
    async fn test_expired_fresh_token_is_rejected() {
        // テスト項目: リフレッシュ直後のトークンが期限切れなら返さずにエラーにする
        // given (前提条件):
        let stale = token_expiring_at(NOW - 10);
        let also_stale = token_expiring_at(NOW - 5);
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_session()
            .returning(move || Ok(Some(session(stale.clone()))));
        identity
            .expect_refresh_session()
            .returning(move || Ok(session(also_stale.clone())));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(AuthError::Expired {
                expires_at: NOW - 5,
                now: NOW
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_fresh_token_is_rejected() {
        // テスト項目: 匿名サインインで得たトークンがデコードできなければエラーにする
        // given (前提条件):
        let mut identity = MockIdentityProvider::new();
        identity.expect_get_session().returning(|| Ok(None));
        identity
            .expect_sign_in_anonymously()
            .returning(|_| Ok(session("garbage".to_string())));
        let provider = create_provider(identity);

        // when (操作):
        let result = provider.ensure_valid_token(&org()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(AuthError::MalformedToken(_))));
    }

    #[test]
    fn test_visitor_id_is_stable_per_instance() {
        // テスト項目: 訪問者 ID はインスタンスごとに固定で、インスタンス間では異なる
        // given (前提条件):
        let first = create_provider(MockIdentityProvider::new());
        let second = create_provider(MockIdentityProvider::new());

        // when (操作):
        let id = first.visitor_id().to_string();

        // then (期待する結果):
        assert_eq!(first.visitor_id(), id);
        assert_ne!(first.visitor_id(), second.visitor_id());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
