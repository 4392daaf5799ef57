use crate::{config::Config, error::{AppError, Result}};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 只负责校验调用方身份；登录注册等流程由外部认证服务完成
#[derive(Clone)]
pub struct AuthService {
    config: Config,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 用户ID
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }

    /// 签发令牌，供本地调试和测试使用
    pub fn issue_token(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let auth = AuthService::new(&Config::default());
        let token = auth.issue_token("uma", Duration::minutes(5)).unwrap();
        assert_eq!(auth.verify_jwt(&token).unwrap().sub, "uma");
    }

    #[test]
    fn test_rejects_expired_and_foreign_tokens() {
        let auth = AuthService::new(&Config::default());
        let expired = auth.issue_token("uma", Duration::hours(-2)).unwrap();
        assert!(matches!(auth.verify_jwt(&expired), Err(AppError::Authentication(_))));

        let other = AuthService::new(&Config {
            jwt_secret: "another-secret".to_string(),
            ..Config::default()
        });
        let foreign = other.issue_token("uma", Duration::minutes(5)).unwrap();
        assert!(auth.verify_jwt(&foreign).is_err());
    }
}
