//! SSH key-pair generation for machines that don't reuse a provider key.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use ssh_key::PublicKey;
use ssh_key::public::{KeyData, RsaPublicKey};

const DEFAULT_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generate(#[from] rsa::Error),

    #[error("key encoding failed: {0}")]
    Encode(#[from] rsa::pkcs1::Error),

    #[error("public key encoding failed: {0}")]
    OpenSsh(#[from] ssh_key::Error),

    #[error("key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces a private key file and its OpenSSH public counterpart.
pub trait KeyPairGenerator: Send + Sync + 'static {
    /// Write the private key to `path` and the public key to
    /// [`public_key_path`]`(path)`. Returns the public key line.
    fn generate(&self, path: &Path) -> Result<String, KeyError>;
}

/// `<path>.pub`.
pub fn public_key_path(private: &Path) -> PathBuf {
    let mut name = OsString::from(private.as_os_str());
    name.push(".pub");
    PathBuf::from(name)
}

/// RSA keys in PKCS#1 PEM, readable by OpenSSH as `id_rsa`.
#[derive(Debug, Clone)]
pub struct RsaKeyGenerator {
    bits: usize,
}

impl Default for RsaKeyGenerator {
    fn default() -> Self {
        Self { bits: DEFAULT_BITS }
    }
}

impl RsaKeyGenerator {
    pub fn with_bits(bits: usize) -> Self {
        Self { bits }
    }
}

impl KeyPairGenerator for RsaKeyGenerator {
    fn generate(&self, path: &Path) -> Result<String, KeyError> {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, self.bits)?;
        let pem = key.to_pkcs1_pem(LineEnding::LF)?;

        write_private(path, pem.as_bytes())?;

        let public = openssh_public_key(&key)?;
        let public_path = public_key_path(path);
        fs::write(&public_path, format!("{public}\n")).map_err(|source| KeyError::Io {
            path: public_path,
            source,
        })?;

        tracing::debug!(path = %path.display(), bits = self.bits, "generated ssh key pair");
        Ok(public)
    }
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), KeyError> {
    let io_err = |source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)
}

/// `ssh-rsa <base64 wire blob>` as found in `authorized_keys`.
fn openssh_public_key(key: &RsaPrivateKey) -> Result<String, KeyError> {
    let rsa = RsaPublicKey::try_from(key.to_public_key())?;
    Ok(PublicKey::from(KeyData::Rsa(rsa)).to_openssh()?)
}
