//! Wallet generation, password-derived encryption-at-rest, and in-memory
//! signing. The sole path from stored ciphertext to a usable signature.
//!
//! No operation here returns, logs, or persists the plaintext private key.
//! The plaintext only ever lives inside a `Zeroizing` buffer scoped to a
//! single `sign` call.

use crate::address::Address;
use crate::error::VaultError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const FORMAT_VERSION: u8 = 1;

/// Self-describing on-disk blob: everything needed to re-derive the key
/// and authenticate the ciphertext, plus the address for fast listing.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
struct WalletFile {
    #[n(0)]
    version: u8,
    #[n(1)]
    address: Address,
    #[n(2)]
    salt: Vec<u8>,
    #[n(3)]
    kdf_iterations: u32,
    #[n(4)]
    nonce: Vec<u8>,
    #[n(5)]
    ciphertext: Vec<u8>,
}

/// A short-lived in-memory holder of a decrypted signing key. Not
/// reference-counted, not shareable, not serialisable — plaintext is
/// wiped the moment `sign` returns or the handle is dropped.
pub struct WalletHandle {
    name: String,
    address: Address,
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl WalletHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, key.as_mut());
    key
}

/// Generates, encrypts, persists, loads, and uses signing keys; backed by
/// one self-describing file per wallet under `wallet_dir`. A small
/// in-memory index of name -> address is cached for `list` so listing
/// never touches ciphertext.
pub struct WalletVault {
    wallet_dir: PathBuf,
    kdf_iterations: u32,
    index: RwLock<HashMap<String, Address>>,
}

impl WalletVault {
    pub fn open(wallet_dir: impl Into<PathBuf>, kdf_iterations: u32) -> Result<Self, VaultError> {
        let wallet_dir = wallet_dir.into();
        std::fs::create_dir_all(&wallet_dir)
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let mut index = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&wallet_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("wallet") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Ok(bytes) = std::fs::read(&path) {
                    if let Ok(file) = minicbor::decode::<WalletFile>(&bytes) {
                        index.insert(name.to_string(), file.address);
                    }
                }
            }
        }
        Ok(Self {
            wallet_dir,
            kdf_iterations,
            index: RwLock::new(index),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.wallet_dir.join(format!("{name}.wallet"))
    }

    /// Generates a 32-byte private key via a CSPRNG, derives the address
    /// (Keccak-256 of the uncompressed public key, last 20 bytes),
    /// encrypts with a PBKDF2-HMAC-SHA256 derived key under AES-256-GCM,
    /// and persists.
    pub fn create(&self, name: &str, password: &str) -> Result<Address, VaultError> {
        if self.path_for(name).exists() {
            return Err(VaultError::AlreadyExists(name.to_string()));
        }

        let mut raw_key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(raw_key.as_mut());
        let signing_key = SigningKey::from_slice(raw_key.as_slice())
            .map_err(|e| VaultError::Signing(e.to_string()))?;
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded_point = verifying_key.to_encoded_point(false);
        let xy: [u8; 64] = encoded_point.as_bytes()[1..]
            .try_into()
            .map_err(|_| VaultError::Signing("unexpected public key length".into()))?;
        let address = Address::from_bytes(crate::utils::address_from_uncompressed_pubkey(&xy));

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let derived = derive_key(password, &salt, self.kdf_iterations);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let cipher = Aes256Gcm::new_from_slice(derived.as_slice())
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), raw_key.as_slice())
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        let file = WalletFile {
            version: FORMAT_VERSION,
            address,
            salt: salt.to_vec(),
            kdf_iterations: self.kdf_iterations,
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        };
        let encoded = minicbor::to_vec(&file).map_err(|e| VaultError::Storage(e.to_string()))?;
        std::fs::write(self.path_for(name), encoded)
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        self.index
            .write()
            .unwrap()
            .insert(name.to_string(), address);

        tracing::info!(wallet = name, address = %address, "created wallet");
        Ok(address)
    }

    /// Reads the file, re-derives the key, decrypts. Authentication
    /// failure (wrong password, or a tampered file) surfaces as
    /// `VaultError::BadCredentials`, never a panic.
    pub fn load(&self, name: &str, password: &str) -> Result<WalletHandle, VaultError> {
        let path = self.path_for(name);
        let bytes = std::fs::read(&path).map_err(|_| VaultError::NotFound(name.to_string()))?;
        let file: WalletFile =
            minicbor::decode(&bytes).map_err(|e| VaultError::Storage(e.to_string()))?;

        let derived = derive_key(password, &file.salt, file.kdf_iterations);
        let cipher = Aes256Gcm::new_from_slice(derived.as_slice())
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&file.nonce), file.ciphertext.as_slice())
            .map_err(|_| VaultError::BadCredentials(name.to_string()))?;

        let mut key = Zeroizing::new([0u8; 32]);
        if plaintext.len() != 32 {
            return Err(VaultError::BadCredentials(name.to_string()));
        }
        key.copy_from_slice(&plaintext);

        Ok(WalletHandle {
            name: name.to_string(),
            address: file.address,
            key,
        })
    }

    /// Produces a secp256k1 ECDSA signature over the Keccak-256 hash of
    /// `raw_tx_payload` with EIP-155 replay protection, returning an
    /// RLP-encoded signed transaction blob and its Keccak-256 hash. The
    /// plaintext key is wiped when `handle` is dropped at the end of this
    /// call; this is the only operation that ever touches it.
    pub fn sign(
        &self,
        handle: &WalletHandle,
        raw_tx: &UnsignedTransaction,
        chain_id: u64,
    ) -> Result<(Vec<u8>, String), VaultError> {
        let signing_key = SigningKey::from_slice(handle.key.as_slice())
            .map_err(|e| VaultError::Signing(e.to_string()))?;

        let unsigned_rlp = raw_tx.encode_unsigned(chain_id);
        let digest = crate::utils::keccak256(&unsigned_rlp);

        let (signature, recovery_id): (Signature, RecoveryId) = signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| VaultError::Signing(e.to_string()))?;

        let v = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());
        let signed_rlp = raw_tx.encode_signed(&signature, v);
        let tx_hash = crate::utils::keccak256(&signed_rlp);
        let hash_hex = format!("0x{}", hex::encode(tx_hash));

        tracing::info!(wallet = %handle.name, hash = %hash_hex, "signed transaction");
        Ok((signed_rlp, hash_hex))
    }

    pub fn list(&self) -> Vec<(String, Address)> {
        self.index
            .read()
            .unwrap()
            .iter()
            .map(|(n, a)| (n.clone(), *a))
            .collect()
    }
}

/// Minimal legacy-style transaction payload sufficient to exercise EIP-155
/// signing and RLP encoding. Field values beyond `nonce`/`to`/`value` are
/// populated by the orchestrator from the policy config and the
/// transport's fee estimate.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

fn trim_leading_zeros(bytes: [u8; 16]) -> Vec<u8> {
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first_nonzero..].to_vec()
}

impl UnsignedTransaction {
    fn append_fields(&self, s: &mut rlp::RlpStream) {
        s.append(&self.nonce);
        s.append(&trim_leading_zeros(self.gas_price.to_be_bytes()));
        s.append(&self.gas_limit);
        s.append(&self.to.as_bytes().to_vec());
        s.append(&trim_leading_zeros(self.value.to_be_bytes()));
        s.append(&self.data);
    }

    /// Legacy-style RLP encoding with EIP-155's `(chain_id, 0, 0)` tail in
    /// place of the signature, hashed and signed as the sighash.
    fn encode_unsigned(&self, chain_id: u64) -> Vec<u8> {
        let mut s = rlp::RlpStream::new_list(9);
        self.append_fields(&mut s);
        s.append(&chain_id);
        s.append_empty_data();
        s.append_empty_data();
        s.out().to_vec()
    }

    fn encode_signed(&self, signature: &Signature, v: u64) -> Vec<u8> {
        let mut s = rlp::RlpStream::new_list(9);
        self.append_fields(&mut s);
        s.append(&v);
        s.append(&signature.r().to_bytes().to_vec());
        s.append(&signature.s().to_bytes().to_vec());
        s.out().to_vec()
    }
}
