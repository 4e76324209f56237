//! Authentication messages and the SCRAM-SHA-256 client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::protocol::codec::MessageBuilder;

type HmacSha256 = Hmac<Sha256>;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute MD5 password hash.
///
/// PostgreSQL MD5 password format: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let first_hash_hex = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(first_hash_hex.as_bytes());
    hasher.update(salt);

    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
///
/// mechanism: SASL mechanism name (e.g., "SCRAM-SHA-256")
/// initial_response: Client-first-message for SCRAM
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
///
/// response: Client-final-message for SCRAM
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

/// Channel binding state announced in the GS2 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBinding {
    /// Client does not support channel binding (`n,,`)
    Unsupported,
    /// Client supports it but the server did not offer it (`y,,`)
    NotOfferedByServer,
    /// `tls-server-end-point` binding with the server certificate hash
    TlsServerEndPoint(Vec<u8>),
}

impl ChannelBinding {
    /// GS2 header that prefixes the client-first-message.
    pub fn gs2_header(&self) -> &'static str {
        match self {
            ChannelBinding::Unsupported => "n,,",
            ChannelBinding::NotOfferedByServer => "y,,",
            ChannelBinding::TlsServerEndPoint(_) => "p=tls-server-end-point,,",
        }
    }

    /// Value of the `c=` attribute: base64(gs2-header + binding data).
    fn encoded(&self) -> String {
        let mut input = self.gs2_header().as_bytes().to_vec();
        if let ChannelBinding::TlsServerEndPoint(hash) = self {
            input.extend_from_slice(hash);
        }
        STANDARD.encode(input)
    }
}

/// Escape a SCRAM `saslname` (`=` and `,` are reserved).
fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| format!("HMAC error: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// SCRAM-SHA-256 client implementation.
pub struct ScramClient {
    /// Client nonce
    nonce: String,
    /// Username, escaped for the client-first-message
    user: String,
    /// Password
    password: String,
    /// Channel binding announced in the GS2 header
    channel_binding: ChannelBinding,
    /// Auth message for signature verification
    auth_message: Option<String>,
    /// Salted password for server signature verification
    salted_password: Option<[u8; 32]>,
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("channel_binding", &self.channel_binding.gs2_header())
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    /// Create a new SCRAM client with a random 24-byte nonce.
    pub fn new(user: &str, password: &str, channel_binding: ChannelBinding) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(user, password, channel_binding, STANDARD.encode(nonce_bytes))
    }

    fn with_nonce(
        user: &str,
        password: &str,
        channel_binding: ChannelBinding,
        nonce: String,
    ) -> Self {
        Self {
            nonce,
            user: escape_username(user),
            password: password.to_string(),
            channel_binding,
            auth_message: None,
            salted_password: None,
        }
    }

    /// Channel binding used by this exchange.
    pub fn channel_binding(&self) -> &ChannelBinding {
        &self.channel_binding
    }

    /// Generate the client-first-message.
    pub fn client_first_message(&self) -> String {
        format!(
            "{}{}",
            self.channel_binding.gs2_header(),
            self.client_first_message_bare()
        )
    }

    fn client_first_message_bare(&self) -> String {
        format!("n={},r={}", self.user, self.nonce)
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, String> {
        use pbkdf2::pbkdf2_hmac;

        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse::<u32>().ok();
            } else if part.starts_with("m=") {
                return Err("Unsupported mandatory extension in server-first-message".into());
            }
        }

        let combined_nonce = combined_nonce.ok_or("Missing nonce in server-first-message")?;
        let salt_b64 = salt_b64.ok_or("Missing salt in server-first-message")?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or("Missing iterations in server-first-message")?;

        if combined_nonce.len() <= self.nonce.len() || !combined_nonce.starts_with(&self.nonce) {
            return Err("Server nonce doesn't extend client nonce".to_string());
        }

        let salt = STANDARD
            .decode(salt_b64)
            .map_err(|e| format!("Invalid salt: {}", e))?;

        // SaltedPassword = Hi(password, salt, iterations)
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let client_final_without_proof = format!(
            "c={},r={}",
            self.channel_binding.encoded(),
            combined_nonce
        );

        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        // ClientProof = ClientKey XOR ClientSignature
        let mut client_proof = [0u8; 32];
        for (proof, (key, signature)) in client_proof
            .iter_mut()
            .zip(client_key.iter().zip(client_signature.iter()))
        {
            *proof = key ^ signature;
        }

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            STANDARD.encode(client_proof)
        ))
    }

    /// Verify server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), String> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(format!("Server rejected SCRAM exchange: {}", error));
        }

        let server_signature_b64 = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or("Invalid server-final-message format")?;

        let server_signature = STANDARD
            .decode(server_signature_b64)
            .map_err(|e| format!("Invalid server signature: {}", e))?;

        let salted_password = self
            .salted_password
            .as_ref()
            .ok_or("Missing salted password")?;
        let auth_message = self.auth_message.as_ref().ok_or("Missing auth message")?;

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected_signature.as_slice() {
            return Err("Server signature verification failed".to_string());
        }

        Ok(())
    }
}
