/// Password hashing and verification using Argon2id
///
/// Hashes are stored in PHC string format:
/// `$argon2id$v=19$m=<mem>,t=<time>,p=<par>$<salt>$<hash>`
///
/// The encoded string carries its own parameters, so verification always
/// re-derives with the parameters the hash was created with. Raising the
/// configured cost only affects new hashes.
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use encore_core::Argon2Config;
use thiserror::Error;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hashing(String),

    #[error("Invalid password hash format")]
    InvalidHash,

    #[error("Incompatible argon2 version")]
    IncompatibleVersion,
}

/// Password hashing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 2)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Argon2Config::default().into()
    }
}

impl From<Argon2Config> for PasswordConfig {
    fn from(config: Argon2Config) -> Self {
        Self {
            memory_cost: config.memory_kib,
            time_cost: config.time_cost,
            parallelism: config.parallelism,
            output_len: config.output_len,
        }
    }
}

impl PasswordConfig {
    /// Create Argon2 parameters from this configuration
    fn to_params(self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(self.output_len),
        )
        .map_err(|e| PasswordError::Hashing(e.to_string()))
    }
}

/// Argon2id hasher bound to one parameter set
///
/// Holds a precomputed hash of a random value so that lookups which find no
/// usable hash can still spend the same work as a real verification.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    config: PasswordConfig,
    params: Params,
    dummy_hash: String,
}

impl PasswordHasher {
    /// Create a hasher, validating the parameters up front
    pub fn new(config: PasswordConfig) -> Result<Self, PasswordError> {
        let params = config.to_params()?;
        let dummy_secret = SaltString::generate(&mut OsRng);
        let dummy_hash = derive(params.clone(), dummy_secret.as_str())?;

        Ok(Self {
            config,
            params,
            dummy_hash,
        })
    }

    /// Parameters used for new hashes
    pub fn config(&self) -> PasswordConfig {
        self.config
    }

    /// Hash a plaintext password with a fresh 16-byte salt
    ///
    /// # Arguments
    ///
    /// * `password` - The plaintext password to hash
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - PHC string (algorithm, version, parameters, salt, hash)
    /// * `Err(PasswordError)` - If hashing fails
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        derive(self.params.clone(), password)
    }

    /// Verify a plaintext password against a stored hash
    ///
    /// # Arguments
    ///
    /// * `password` - The plaintext password to verify
    /// * `encoded` - The stored PHC string
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Password matches
    /// * `Ok(false)` - Password does not match
    /// * `Err(PasswordError::InvalidHash)` - The stored value is not an argon2id hash
    /// * `Err(PasswordError::IncompatibleVersion)` - The hash uses another argon2 version
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(encoded).map_err(|_| PasswordError::InvalidHash)?;

        if parsed.algorithm != argon2::ARGON2ID_IDENT {
            return Err(PasswordError::InvalidHash);
        }
        match parsed.version {
            Some(v) if v == Version::V0x13 as u32 => {}
            Some(_) => return Err(PasswordError::IncompatibleVersion),
            None => return Err(PasswordError::InvalidHash),
        }
        if parsed.salt.is_none() || parsed.hash.is_none() {
            return Err(PasswordError::InvalidHash);
        }

        // Argon2::default() is fine here: verification re-derives with the
        // algorithm, version and params embedded in `parsed`.
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(PasswordError::InvalidHash),
        }
    }

    /// Burn one verification against the dummy hash; always false
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy_hash);
        false
    }
}

fn derive(params: Params, password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;

    Ok(password_hash.to_string())
}
