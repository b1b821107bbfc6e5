//! Request signing schemes of the iSolarCloud gateway.
//!
//! The gateway grew several authentication schemes over time. Each one is an
//! [`AuthStrategy`] picked from [`AuthMode`] when the client is built.

use crate::api::crypto;
use crate::api::Error;
use crate::model::{AuthMode, Credentials, Session};
use rsa::RsaPublicKey;
use serde_json::{Map, Value};

pub const LANG: &str = "_en_US";

const CONTENT_TYPE: &str = "application/json;charset=UTF-8";
/* Marks the caller as an internal (open API) application */
const SYS_CODE: &str = "901";

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_SYS_CODE: &str = "sys_code";
pub const HEADER_ACCESS_KEY: &str = "x-access-key";
pub const HEADER_RANDOM_KEY: &str = "x-random-secret-key";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// A request ready to be posted.
#[derive(Debug, Clone)]
pub struct SealedRequest {
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    /// Per-request symmetric key, kept to open the response.
    pub session_key: Option<String>,
}

/// How a client without any session obtains one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    PasswordLogin,
    /// Only a browser authorization can produce the first OAuth session.
    Authorization,
}

pub trait AuthStrategy: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// Build headers and payload for `params`, attaching `session` if any.
    fn seal(
        &self,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<SealedRequest, Error>;

    /// Recover the JSON text of a response to `request`.
    fn open(&self, _request: &SealedRequest, body: String) -> Result<String, Error> {
        Ok(body)
    }

    fn renewal(&self) -> Renewal {
        Renewal::PasswordLogin
    }
}

/// Select the strategy for `mode`. Missing key material is a configuration error.
pub fn strategy(mode: AuthMode, credentials: &Credentials) -> Result<Box<dyn AuthStrategy>, Error> {
    let secret = || {
        credentials
            .secret_key
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Configuration("Secret key required".to_string()))
    };

    if credentials.appkey.is_empty() {
        return Err(Error::Configuration("App key required".to_string()));
    }

    let strategy: Box<dyn AuthStrategy> = match mode {
        AuthMode::Plain => Box::new(PlainBearer {
            appkey: credentials.appkey.clone(),
        }),
        AuthMode::Secret => Box::new(SharedSecret {
            appkey: credentials.appkey.clone(),
            secret_key: secret()?,
        }),
        AuthMode::Encrypted => {
            let pem = credentials
                .rsa_public_key
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::Configuration("RSA public key required".to_string()))?;
            Box::new(EncryptedBody {
                inner: SharedSecret {
                    appkey: credentials.appkey.clone(),
                    secret_key: secret()?,
                },
                public_key: crypto::parse_public_key(pem)
                    .map_err(|e| Error::Configuration(e.to_string()))?,
            })
        }
        AuthMode::OAuth => Box::new(OAuth {
            inner: SharedSecret {
                appkey: credentials.appkey.clone(),
                secret_key: secret()?,
            },
        }),
    };

    Ok(strategy)
}

fn plain_request(
    appkey: &str,
    access_key: &str,
    params: Map<String, Value>,
    session: Option<&Session>,
) -> Result<SealedRequest, Error> {
    let mut headers = vec![
        (HEADER_CONTENT_TYPE, CONTENT_TYPE.to_string()),
        (HEADER_SYS_CODE, SYS_CODE.to_string()),
        (HEADER_ACCESS_KEY, access_key.to_string()),
    ];

    let mut body = Map::new();
    body.insert("appkey".to_string(), Value::from(appkey));
    body.insert("lang".to_string(), Value::from(LANG));
    body.extend(params);

    match session {
        Some(Session::Token(session)) => {
            body.insert("token".to_string(), Value::from(session.token.as_str()));
        }
        Some(Session::OAuth(session)) => {
            headers.push((
                HEADER_AUTHORIZATION,
                format!("Bearer {}", session.access_token),
            ));
        }
        None => {}
    }

    let body = serde_json::to_string(&Value::Object(body))
        .map_err(|e| Error::InvalidResponse(format!("Unable to encode request: {}", e)))?;

    Ok(SealedRequest {
        headers,
        body,
        session_key: None,
    })
}

/// Application key in the access-key header, token in the body.
pub struct PlainBearer {
    appkey: String,
}

impl AuthStrategy for PlainBearer {
    fn mode(&self) -> AuthMode {
        AuthMode::Plain
    }

    fn seal(
        &self,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<SealedRequest, Error> {
        plain_request(&self.appkey, &self.appkey, params, session)
    }
}

/// Secret key in the access-key header, application key in the body.
pub struct SharedSecret {
    appkey: String,
    secret_key: String,
}

impl AuthStrategy for SharedSecret {
    fn mode(&self) -> AuthMode {
        AuthMode::Secret
    }

    fn seal(
        &self,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<SealedRequest, Error> {
        plain_request(&self.appkey, &self.secret_key, params, session)
    }
}

/// Shared-secret request whose body is AES encrypted with a fresh key per
/// request; the key travels RSA-wrapped in a header.
pub struct EncryptedBody {
    inner: SharedSecret,
    public_key: RsaPublicKey,
}

impl AuthStrategy for EncryptedBody {
    fn mode(&self) -> AuthMode {
        AuthMode::Encrypted
    }

    fn seal(
        &self,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<SealedRequest, Error> {
        let mut request = self.inner.seal(params, session)?;
        let key = crypto::session_key();

        request
            .headers
            .push((HEADER_RANDOM_KEY, crypto::wrap_key(&self.public_key, &key)?));
        request.body = crypto::encrypt(&key, request.body.as_bytes())?;
        request.session_key = Some(key);

        Ok(request)
    }

    fn open(&self, request: &SealedRequest, body: String) -> Result<String, Error> {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.starts_with('{') {
            return Ok(body);
        }

        match &request.session_key {
            Some(key) => crypto::decrypt(key, trimmed),
            None => Ok(body),
        }
    }
}

/// Shared-secret request carrying an OAuth bearer token.
pub struct OAuth {
    inner: SharedSecret,
}

impl AuthStrategy for OAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::OAuth
    }

    fn seal(
        &self,
        params: Map<String, Value>,
        session: Option<&Session>,
    ) -> Result<SealedRequest, Error> {
        self.inner.seal(params, session)
    }

    fn renewal(&self) -> Renewal {
        Renewal::Authorization
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::crypto::test::keypair;
    use crate::model::{OAuthSession, TokenSession};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use rsa::Pkcs1v15Encrypt;
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials {
            host: "http://localhost".to_string(),
            appkey: "APPKEY".to_string(),
            secret_key: Some("SECRET".to_string()),
            rsa_public_key: None,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        }
    }

    fn params() -> Map<String, Value> {
        json!({"curPage": 1, "size": 100}).as_object().unwrap().clone()
    }

    fn header<'a>(request: &'a SealedRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    fn token_session() -> Session {
        Session::Token(TokenSession {
            token: "tok".to_string(),
            user_id: None,
            saved_at: None,
        })
    }

    #[test]
    fn plain_puts_appkey_in_header_and_token_in_body() {
        let strategy = strategy(AuthMode::Plain, &credentials()).unwrap();
        let request = strategy.seal(params(), Some(&token_session())).unwrap();
        let body: Value = serde_json::from_str(&request.body).unwrap();

        assert_eq!(Some("APPKEY"), header(&request, HEADER_ACCESS_KEY));
        assert_eq!(Some("901"), header(&request, HEADER_SYS_CODE));
        assert_eq!(
            json!({"appkey": "APPKEY", "lang": "_en_US", "curPage": 1, "size": 100, "token": "tok"}),
            body
        );
        assert_eq!(Renewal::PasswordLogin, strategy.renewal());
    }

    #[test]
    fn secret_goes_to_header() {
        let strategy = strategy(AuthMode::Secret, &credentials()).unwrap();
        let request = strategy.seal(params(), None).unwrap();
        let body: Value = serde_json::from_str(&request.body).unwrap();

        assert_eq!(Some("SECRET"), header(&request, HEADER_ACCESS_KEY));
        assert_eq!(json!("APPKEY"), body["appkey"]);
        assert!(body.get("token").is_none());
    }

    #[test]
    fn secret_mode_requires_secret() {
        let mut credentials = credentials();
        credentials.secret_key = None;

        assert!(matches!(
            strategy(AuthMode::Secret, &credentials),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            strategy(AuthMode::Encrypted, &credentials),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn encrypted_body_opens_with_wrapped_key() {
        let (private, pem) = keypair();
        let mut credentials = credentials();
        credentials.rsa_public_key = Some(pem);

        let strategy = strategy(AuthMode::Encrypted, &credentials).unwrap();
        let request = strategy.seal(params(), Some(&token_session())).unwrap();

        let wrapped = STANDARD
            .decode(header(&request, HEADER_RANDOM_KEY).unwrap())
            .unwrap();
        let key = String::from_utf8(private.decrypt(Pkcs1v15Encrypt, &wrapped).unwrap()).unwrap();
        assert_eq!(request.session_key.as_deref(), Some(key.as_str()));

        let body: Value = serde_json::from_str(&crypto::decrypt(&key, &request.body).unwrap()).unwrap();
        assert_eq!(json!("tok"), body["token"]);
        assert_eq!(json!(100), body["size"]);

        /* responses are decrypted with the same key; plain JSON passes through */
        let sealed_response = crypto::encrypt(&key, b"{\"result_code\":\"1\"}").unwrap();
        assert_eq!(
            "{\"result_code\":\"1\"}",
            strategy.open(&request, sealed_response).unwrap()
        );
        assert_eq!("{}", strategy.open(&request, "{}".to_string()).unwrap());
    }

    #[test]
    fn each_request_gets_a_new_key() {
        let (_, pem) = keypair();
        let mut credentials = credentials();
        credentials.rsa_public_key = Some(pem);

        let strategy = strategy(AuthMode::Encrypted, &credentials).unwrap();
        let first = strategy.seal(params(), None).unwrap();
        let second = strategy.seal(params(), None).unwrap();
        assert_ne!(first.session_key, second.session_key);
    }

    #[test]
    fn oauth_uses_bearer() {
        let strategy = strategy(AuthMode::OAuth, &credentials()).unwrap();
        let session = Session::OAuth(OAuthSession {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in: None,
            expires_at: None,
            auth_ps_list: None,
            auth_user: None,
        });
        let request = strategy.seal(params(), Some(&session)).unwrap();
        let body: Value = serde_json::from_str(&request.body).unwrap();

        assert_eq!(Some("Bearer access"), header(&request, HEADER_AUTHORIZATION));
        assert!(body.get("token").is_none());
        assert_eq!(Renewal::Authorization, strategy.renewal());
    }
}
