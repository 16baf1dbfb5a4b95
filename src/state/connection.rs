//! Connection startup and authentication state machine.

use tracing::debug;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ParameterStatus, RawMessage, ReadyForQuery, msg_type,
    parse_fields,
};
use crate::protocol::frontend::auth::{ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Drives a fresh link from the first byte to the first ReadyForQuery.
pub struct StartupStateMachine {
    state: ConnectionState,
    options: Opts,
    tls_available: bool,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
    write_buffer: Vec<u8>,
}

impl StartupStateMachine {
    /// `tls_available` tells whether the caller can perform a TLS handshake.
    pub fn new(options: Opts, tls_available: bool) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            tls_available,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
            write_buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Process id and secret key, for cancellation.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Parameters reported by the server so far.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Start the connection process.
    pub fn start(&mut self) -> Result<Action<'_>> {
        self.write_buffer.clear();
        let want_tls = match self.options.ssl_mode {
            SslMode::Disable => false,
            SslMode::Prefer => self.tls_available,
            SslMode::Require if self.tls_available => true,
            SslMode::Require => {
                self.state = ConnectionState::Failed;
                return Err(Error::Unsupported(
                    "sslmode=require needs the tls feature".into(),
                ));
            }
        };

        if want_tls {
            write_ssl_request(&mut self.write_buffer);
            self.state = ConnectionState::WaitingSslResponse;
            Ok(Action::WriteAndReadByte(&self.write_buffer))
        } else {
            self.write_startup_message();
            self.state = ConnectionState::WaitingAuth;
            Ok(Action::WriteAndReadMessage(&self.write_buffer))
        }
    }

    /// Process the SSL response byte ('S' or 'N').
    pub fn process_ssl_response(&mut self, response: u8) -> Result<Action<'_>> {
        match response {
            b'S' => {
                self.state = ConnectionState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' if self.options.ssl_mode == SslMode::Require => {
                self.state = ConnectionState::Failed;
                Err(Error::Failure(
                    "SSL required but not supported by server".into(),
                ))
            }
            b'N' => {
                self.write_buffer.clear();
                self.write_startup_message();
                self.state = ConnectionState::WaitingAuth;
                Ok(Action::WriteAndReadMessage(&self.write_buffer))
            }
            _ => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!(
                    "Unexpected SSL response: {}",
                    response
                )))
            }
        }
    }

    /// Called after the TLS handshake completed.
    pub fn tls_established(&mut self) -> Action<'_> {
        self.write_buffer.clear();
        self.write_startup_message();
        self.state = ConnectionState::WaitingAuth;
        Action::WriteAndReadMessage(&self.write_buffer)
    }

    /// Process one message from the server.
    pub fn step(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => return Ok(Action::Notice(parse_fields(msg.payload)?)),
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                self.set_param(param.name, param.value);
                return Ok(Action::ReadMessage);
            }
            msg_type::ERROR_RESPONSE => {
                let fields = parse_fields(msg.payload)?;
                self.state = ConnectionState::Failed;
                return Err(Error::Failure(fields.to_string()));
            }
            _ => {}
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(msg),
            ConnectionState::SaslInProgress => self.handle_sasl_message(msg),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(msg),
            ConnectionState::WaitingReady => self.handle_ready_message(msg),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in state {:?}",
                self.state
            ))),
        }
    }

    fn set_param(&mut self, name: &str, value: &str) {
        match self.server_params.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self
                .server_params
                .push((name.to_string(), value.to_string())),
        }
    }

    fn write_startup_message(&mut self) {
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.options.user),
            ("client_encoding", "UTF8"),
        ];
        if let Some(db) = &self.options.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.options.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.options.params {
            params.push((name, value));
        }
        write_startup(&mut self.write_buffer, &params);
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn expect_auth<'m>(&self, msg: RawMessage<'m>) -> Result<AuthenticationMessage<'m>> {
        if msg.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                msg.type_byte as char
            )));
        }
        AuthenticationMessage::parse(msg.payload)
    }

    fn handle_auth_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match self.expect_auth(msg)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage(&self.write_buffer))
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage(&self.write_buffer))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&"SCRAM-SHA-256") {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {}",
                        mechanisms.join(", ")
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                self.write_buffer.clear();
                write_sasl_initial_response(
                    &mut self.write_buffer,
                    "SCRAM-SHA-256",
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Action::WriteAndReadMessage(&self.write_buffer))
            }
            AuthenticationMessage::Other(code) => Err(Error::Unsupported(format!(
                "Unsupported authentication method: {}",
                code
            ))),
            other => Err(Error::Protocol(format!(
                "Unexpected authentication message: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        let auth = self.expect_auth(msg)?;
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(Error::Auth)?;
                self.write_buffer.clear();
                write_sasl_response(&mut self.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage(&self.write_buffer))
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final).map_err(Error::Auth)?;
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match self.expect_auth(msg)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, msg: RawMessage<'_>) -> Result<Action<'_>> {
        match msg.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(msg.payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                debug!("server negotiated protocol options away");
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        payload
    }

    fn opts() -> Opts {
        Opts {
            user: "alice".into(),
            password: Some("pw".into()),
            database: Some("app".into()),
            ..Opts::default()
        }
    }

    #[test]
    fn trust_authentication() {
        let mut sm = StartupStateMachine::new(opts(), false);
        match sm.start().unwrap() {
            Action::WriteAndReadMessage(bytes) => assert!(bytes.ends_with(b"database\0app\0\0")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            sm.step(RawMessage::new(b'R', &auth(0, &[]))).unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(
            sm.step(RawMessage::new(b'S', b"server_version\x0015.4\0")).unwrap(),
            Action::ReadMessage
        ));
        let mut key = 99_u32.to_be_bytes().to_vec();
        key.extend_from_slice(&5_u32.to_be_bytes());
        sm.step(RawMessage::new(b'K', &key)).unwrap();
        assert!(matches!(
            sm.step(RawMessage::new(b'Z', b"I")).unwrap(),
            Action::Finished
        ));
        assert_eq!(sm.state(), ConnectionState::Ready);
        assert_eq!(sm.backend_key(), Some((99, 5)));
        assert_eq!(
            sm.take_server_params(),
            vec![("server_version".to_string(), "15.4".to_string())]
        );
    }

    #[test]
    fn md5_challenge_is_answered() {
        let mut sm = StartupStateMachine::new(opts(), false);
        sm.start().unwrap();
        match sm.step(RawMessage::new(b'R', &auth(5, &[1, 2, 3, 4]))).unwrap() {
            Action::WriteAndReadMessage(bytes) => {
                assert_eq!(bytes[0], b'p');
                assert!(bytes[5..].starts_with(b"md5"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(sm.state(), ConnectionState::WaitingAuthResult);
    }

    #[test]
    fn server_error_fails_startup() {
        let mut sm = StartupStateMachine::new(opts(), false);
        sm.start().unwrap();
        let err = sm
            .step(RawMessage::new(
                b'E',
                b"SFATAL\0C28P01\0Mpassword authentication failed\0\0",
            ))
            .unwrap_err();
        assert!(err.to_string().contains("password authentication failed"));
        assert_eq!(sm.state(), ConnectionState::Failed);
    }

    #[test]
    fn ssl_negotiation() {
        let mut tls_opts = opts();
        tls_opts.ssl_mode = SslMode::Require;
        assert!(StartupStateMachine::new(tls_opts.clone(), false).start().is_err());

        let mut sm = StartupStateMachine::new(tls_opts, true);
        assert!(matches!(sm.start().unwrap(), Action::WriteAndReadByte(_)));
        assert!(sm.process_ssl_response(b'N').is_err());

        let mut prefer = opts();
        prefer.ssl_mode = SslMode::Prefer;
        let mut sm = StartupStateMachine::new(prefer, true);
        sm.start().unwrap();
        assert!(matches!(
            sm.process_ssl_response(b'N').unwrap(),
            Action::WriteAndReadMessage(_)
        ));
    }
}
