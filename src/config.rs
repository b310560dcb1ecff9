use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub app_env: String,
    pub cors_origins: Vec<String>,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub email: EmailConfig,
    pub github: GithubConfig,
    pub org: OrgConfig,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Cookie name the hosted auth clients expect.
    pub cookie_name: String,
    /// Secret for signing the OAuth state parameter.
    pub secret: String,
    pub expiry_secs: i64,
    /// Extend the session when its last update is older than this.
    pub update_age_secs: i64,
    /// TTL of the composed session context in Redis.
    pub cache_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub signup_window_secs: i64,
    pub signup_max_attempts: i64,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub api_key: String,
    pub api_url: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Clone, Debug)]
pub struct OrgConfig {
    pub trial_days: i64,
    pub default_max_seats: i32,
    pub code_expiry_secs: i64,
    pub invite_expiry_days: i64,
    pub dashboard_url: String,
    pub verify_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            app_env: env_or("APP_ENV", "development"),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000,http://localhost:5173")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "learnstack"),
                user: env_or("DB_USER", "learnstack"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 5),
                pool_max: env_or_parse("DB_POOL_MAX", 50),
                acquire_timeout_secs: env_or_parse("DB_ACQUIRE_TIMEOUT_SEC", 10),
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_or_parse("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
                db: env_or_parse("REDIS_DB", 0),
                key_prefix: "lstk:".to_string(),
            },
            session: SessionConfig {
                cookie_name: "better-auth.session_token".to_string(),
                secret: env_or("SESSION_SECRET", "change-me-to-a-secure-random-string"),
                expiry_secs: parse_duration_to_secs(&env_or("SESSION_EXPIRY", "30d")),
                update_age_secs: parse_duration_to_secs(&env_or("SESSION_UPDATE_AGE", "1d")),
                cache_secs: env_or_parse("SESSION_CACHE_SEC", 300),
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: env_or_parse("RATE_LIMIT_MAX", 100),
                signup_window_secs: env_or_parse("SIGNUP_RATE_WINDOW_SEC", 600),
                signup_max_attempts: env_or_parse("SIGNUP_RATE_MAX", 3),
            },
            email: EmailConfig {
                api_key: env_or("EMAIL_API_KEY", ""),
                api_url: env_or("EMAIL_API_URL", "https://api.resend.com"),
                from: env_or("EMAIL_FROM", "LearnStack <no-reply@learnstack.app>"),
            },
            github: GithubConfig {
                client_id: env_or("GITHUB_CLIENT_ID", ""),
                client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
                redirect_uri: env_or(
                    "GITHUB_REDIRECT_URI",
                    "http://localhost:3000/api/auth/callback/github",
                ),
            },
            org: OrgConfig {
                trial_days: env_or_parse("ORG_TRIAL_DAYS", 14),
                default_max_seats: env_or_parse("ORG_DEFAULT_MAX_SEATS", 5),
                code_expiry_secs: env_or_parse("VERIFICATION_CODE_EXPIRY_SEC", 600),
                invite_expiry_days: env_or_parse("INVITE_EXPIRY_DAYS", 7),
                dashboard_url: env_or("DASHBOARD_URL", "/dashboard"),
                verify_url: env_or("VERIFY_URL", "/verify-email"),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }

    pub fn redis_url(&self) -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }
        match &self.redis.password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis.host, self.redis.port, self.redis.db
            ),
            _ => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

fn parse_duration_to_secs(s: &str) -> i64 {
    let s = s.trim();
    if s.is_empty() {
        return 3600;
    }
    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: i64 = num_str.parse().unwrap_or(1);
    match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => s.parse().unwrap_or(3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration_to_secs("45s"), 45);
        assert_eq!(parse_duration_to_secs("10m"), 600);
        assert_eq!(parse_duration_to_secs("1d"), 86400);
        assert_eq!(parse_duration_to_secs("30d"), 30 * 86400);
    }

    #[test]
    fn duration_bare_number_and_garbage() {
        assert_eq!(parse_duration_to_secs("120"), 120);
        assert_eq!(parse_duration_to_secs(""), 3600);
    }
}
