//! Authentication state machine.
//!
//! Driven by the server's Authentication requests. Each step encodes the
//! client's response (if any) into a caller-provided buffer and returns the
//! [`Action`] the caller must perform next.

use crate::error::{Error, Result};
use crate::opts::{ChannelBindingPolicy, Credential};
use crate::protocol::backend::AuthenticationRequest;
use crate::protocol::frontend::auth::{ChannelBinding, ScramClient, md5_password};
use crate::protocol::frontend::{write_password, write_sasl_initial_response, write_sasl_response};

use super::action::Action;

/// SASL mechanism without channel binding.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";
/// SASL mechanism with `tls-server-end-point` channel binding.
pub const SCRAM_SHA_256_PLUS: &str = "SCRAM-SHA-256-PLUS";

/// Authentication progress.
#[derive(Debug, Default)]
pub enum AuthenticationState {
    /// No request received yet
    #[default]
    Start,
    /// SASLInitialResponse sent, waiting for the server-first-message
    AwaitingSaslContinue(ScramClient),
    /// Client-final-message sent, waiting for the server signature
    AwaitingSaslFinal(ScramClient),
    /// Password or SASL exchange sent, waiting for AuthenticationOk
    AwaitingOk,
    /// AuthenticationOk received
    Done,
}

impl AuthenticationState {
    fn name(&self) -> &'static str {
        match self {
            AuthenticationState::Start => "start",
            AuthenticationState::AwaitingSaslContinue(_) => "awaiting SASL continue",
            AuthenticationState::AwaitingSaslFinal(_) => "awaiting SASL final",
            AuthenticationState::AwaitingOk => "awaiting OK",
            AuthenticationState::Done => "done",
        }
    }
}

/// Pick the SASL mechanism and channel binding for a SCRAM credential.
pub fn select_mechanism(
    mechanisms: &[String],
    policy: ChannelBindingPolicy,
    certificate_hash: Option<&[u8]>,
) -> Result<(&'static str, ChannelBinding)> {
    let offers = |name: &str| mechanisms.iter().any(|m| m == name);

    match (policy, certificate_hash) {
        (_, Some(hash)) if offers(SCRAM_SHA_256_PLUS) => Ok((
            SCRAM_SHA_256_PLUS,
            ChannelBinding::TlsServerEndPoint(hash.to_vec()),
        )),
        (ChannelBindingPolicy::Required, _) => Err(Error::UnsupportedAuthenticationType(format!(
            "channel binding required but unavailable (server offers {:?}, certificate hash {})",
            mechanisms,
            if certificate_hash.is_some() {
                "present"
            } else {
                "absent"
            }
        ))),
        (ChannelBindingPolicy::Preferred, hash) if offers(SCRAM_SHA_256) => {
            let binding = if hash.is_some() {
                ChannelBinding::NotOfferedByServer
            } else {
                ChannelBinding::Unsupported
            };
            Ok((SCRAM_SHA_256, binding))
        }
        (ChannelBindingPolicy::Preferred, _) => Err(Error::UnsupportedAuthenticationType(
            format!("no supported SASL mechanism in {:?}", mechanisms),
        )),
    }
}

/// Client side of the authentication exchange.
pub struct AuthenticationStateMachine {
    user: String,
    credential: Credential,
    certificate_hash: Option<Vec<u8>>,
    state: AuthenticationState,
    password_requested: bool,
}

impl AuthenticationStateMachine {
    /// Create a machine for `user` presenting `credential`.
    pub fn new(user: &str, credential: Credential, certificate_hash: Option<Vec<u8>>) -> Self {
        Self {
            user: user.to_string(),
            credential,
            certificate_hash,
            state: AuthenticationState::Start,
            password_requested: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> &AuthenticationState {
        &self.state
    }

    /// Returns true once AuthenticationOk was received.
    pub fn is_done(&self) -> bool {
        matches!(self.state, AuthenticationState::Done)
    }

    /// Process one authentication request, encoding any response into `buf`.
    pub fn step(&mut self, request: AuthenticationRequest, buf: &mut Vec<u8>) -> Result<Action> {
        buf.clear();
        if request.requests_password() {
            self.password_requested = true;
        }

        match (std::mem::take(&mut self.state), request) {
            (AuthenticationState::Start | AuthenticationState::AwaitingOk, AuthenticationRequest::Ok) => {
                self.state = AuthenticationState::Done;
                Ok(Action::Finished)
            }
            (AuthenticationState::Start, AuthenticationRequest::CleartextPassword) => {
                let Credential::CleartextPassword(password) = &self.credential else {
                    return Err(Error::CleartextPasswordCredentialRequired);
                };
                write_password(buf, password);
                self.state = AuthenticationState::AwaitingOk;
                Ok(Action::WriteAndReadMessage)
            }
            (AuthenticationState::Start, AuthenticationRequest::Md5Password { salt }) => {
                let Credential::Md5Password(password) = &self.credential else {
                    return Err(Error::Md5PasswordCredentialRequired);
                };
                write_password(buf, &md5_password(&self.user, password, &salt));
                self.state = AuthenticationState::AwaitingOk;
                Ok(Action::WriteAndReadMessage)
            }
            (AuthenticationState::Start, AuthenticationRequest::Sasl { mechanisms }) => {
                let Credential::ScramSha256 {
                    password,
                    channel_binding,
                } = &self.credential
                else {
                    return Err(Error::ScramSha256CredentialRequired);
                };
                let (mechanism, binding) = select_mechanism(
                    &mechanisms,
                    *channel_binding,
                    self.certificate_hash.as_deref(),
                )?;
                tracing::debug!(mechanism, "starting SASL exchange");

                let scram = ScramClient::new(&self.user, password, binding);
                write_sasl_initial_response(buf, mechanism, scram.client_first_message().as_bytes());
                self.state = AuthenticationState::AwaitingSaslContinue(scram);
                Ok(Action::WriteAndReadMessage)
            }
            (
                AuthenticationState::AwaitingSaslContinue(mut scram),
                AuthenticationRequest::SaslContinue { data },
            ) => {
                let server_first = simdutf8::compat::from_utf8(&data)
                    .map_err(|e| Error::Protocol(format!("invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first).map_err(Error::Auth)?;
                write_sasl_response(buf, client_final.as_bytes());
                self.state = AuthenticationState::AwaitingSaslFinal(scram);
                Ok(Action::WriteAndReadMessage)
            }
            (AuthenticationState::AwaitingSaslFinal(scram), AuthenticationRequest::SaslFinal { data }) => {
                let server_final = simdutf8::compat::from_utf8(&data)
                    .map_err(|e| Error::Protocol(format!("invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final).map_err(Error::Auth)?;
                self.state = AuthenticationState::AwaitingOk;
                Ok(Action::ReadMessage)
            }
            (state, request) => {
                let error = Error::Protocol(format!(
                    "unexpected authentication request {:?} in state {}",
                    request,
                    state.name()
                ));
                self.state = state;
                Err(error)
            }
        }
    }

    /// Check the outcome once ReadyForQuery followed AuthenticationOk.
    pub fn finish(&self) -> Result<()> {
        if !self.is_done() {
            return Err(Error::Protocol(format!(
                "ReadyForQuery before authentication completed (state {})",
                self.state.name()
            )));
        }
        if !self.password_requested && self.credential != Credential::Trust {
            return Err(Error::TrustCredentialRequired);
        }
        Ok(())
    }
}
