use anyhow::anyhow;
use ed25519_dalek::SigningKey;
use pem_rfc7468::{decode_vec, encode_string};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use std::{
    fs::{self, metadata, File},
    io::{Read, Write},
    path::Path,
};
use zeroize::Zeroizing;

pub trait SecretKeyHandler: Sized {
    /// PEM label the key is stored under
    const LABEL: &'static str;

    fn generate() -> Self;
    fn from_slice(data: &[u8]) -> Result<Self, anyhow::Error>;
    fn secret_bytes(&self) -> Zeroizing<[u8; 32]>;
}

impl SecretKeyHandler for SigningKey {
    const LABEL: &'static str = "ED25519 PRIVATE KEY";

    fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut bytes[..]);
        SigningKey::from_bytes(&bytes)
    }

    fn from_slice(data: &[u8]) -> Result<Self, anyhow::Error> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| anyhow!("Invalid secret key length"))?;
        Ok(SigningKey::from_bytes(&bytes))
    }

    fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.to_bytes())
    }
}

/// HMAC secret shared out of band with the embedded page
pub struct ChannelSecret(SecretBox<[u8; 32]>);

impl ChannelSecret {
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl SecretKeyHandler for ChannelSecret {
    const LABEL: &'static str = "BRIDGE CHANNEL SECRET";

    fn generate() -> Self {
        let mut bytes = Box::new([0u8; 32]);
        rand::rng().fill_bytes(&mut bytes[..]);
        ChannelSecret(SecretBox::new(bytes))
    }

    fn from_slice(data: &[u8]) -> Result<Self, anyhow::Error> {
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| anyhow!("Invalid channel secret length"))?;
        Ok(ChannelSecret(SecretBox::new(Box::new(bytes))))
    }

    fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.0.expose_secret())
    }
}

pub fn get_key<T: SecretKeyHandler>(file_path: &str) -> Result<T, anyhow::Error> {
    if !is_pem_file(file_path) {
        return Err(anyhow!("Not a '.pem' file extension"));
    }

    if metadata(file_path).is_ok() {
        read_key(file_path)
    } else {
        let key = T::generate();
        save_key(file_path, &key)?;
        Ok(key)
    }
}

fn is_pem_file(file_path: &str) -> bool {
    Path::new(file_path).extension().and_then(|s| s.to_str()) == Some("pem")
}

fn read_key<T: SecretKeyHandler>(file_path: &str) -> Result<T, anyhow::Error> {
    let mut file = File::open(file_path)?;
    let mut pem_data = Zeroizing::new(String::new());
    file.read_to_string(&mut pem_data)?;

    let (label, decoded_key) = decode_vec(pem_data.as_bytes()).map_err(|e| anyhow!(e))?;
    let decoded_key = Zeroizing::new(decoded_key);

    if label != T::LABEL {
        return Err(anyhow!(
            "Invalid key format, expected '{}' found '{}'",
            T::LABEL,
            label
        ));
    }

    T::from_slice(&decoded_key)
}

fn save_key<T: SecretKeyHandler>(file_path: &str, key: &T) -> Result<(), anyhow::Error> {
    let pem = Zeroizing::new(
        encode_string(T::LABEL, pem_rfc7468::LineEnding::LF, &key.secret_bytes()[..])
            .map_err(|e| anyhow!("Failed to encode key: {}", e))?,
    );

    if let Some(parent) = Path::new(file_path).parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(file_path)?;
    file.write_all(pem.as_bytes())?;
    Ok(())
}
