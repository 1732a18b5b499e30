//! The MS-CHAP and MS-CHAPv2 authentication exchanges (RFC 2433, RFC 2759).
//!
//! Both protocols answer an authenticator challenge with a DES-encrypted
//! function of the NT password hash. MS-CHAPv2 adds a peer challenge and
//! mutual authentication: the authenticator proves knowledge of the secret
//! back to the peer through the `S=` authenticator response. Success and
//! failure travel as the text messages of CHAP Success/Failure packets,
//! with the failure grammar carrying a numeric error code.
//!
//! A [`Session`] tracks one exchange for either role and arms the MPPE
//! session keys on success.
//!
//! [`Session`]: struct.Session.html
use alloc::string::String;
use alloc::vec::Vec;

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

use ustack::layer::Error;
use ustack::rand::Rng;

use crate::mppe::{self, MppeKeys};

/// Challenge value length of MS-CHAP.
pub const V1_CHALLENGE_LEN: usize = 8;
/// Challenge value length of MS-CHAPv2.
pub const V2_CHALLENGE_LEN: usize = 16;
/// Response value length of both protocols.
pub const RESPONSE_LEN: usize = 49;
/// Length of the NT-Response inside the response value.
pub const NT_RESPONSE_LEN: usize = 24;
/// Length of the hex authenticator response (without the `S=` tag).
pub const AUTH_RESPONSE_LEN: usize = 40;

// Offsets inside the 49-octet response values.
const V1_NT_OFFSET: usize = 24;
const V1_USE_NT_OFFSET: usize = 48;
const V2_PEER_CHALLENGE_OFFSET: usize = 0;
const V2_NT_OFFSET: usize = 24;
const V2_FLAGS_OFFSET: usize = 48;

const MAGIC1: &[u8; 39] = b"Magic server to client signing constant";
const MAGIC2: &[u8; 41] = b"Pad to make it do more than one iteration";

/// Error codes recognized in failure messages.
const ERROR_RESTRICTED_LOGON_HOURS: u16 = 646;
const ERROR_ACCT_DISABLED: u16 = 647;
const ERROR_PASSWD_EXPIRED: u16 = 648;
const ERROR_NO_DIALIN_PERMISSION: u16 = 649;
const ERROR_AUTHENTICATION_FAILURE: u16 = 691;
const ERROR_CHANGING_PASSWORD: u16 = 709;

/// Expand a 56-bit key block to the 64-bit DES layout.
///
/// Each output octet carries seven key bits in its upper bits; the parity
/// bit is left clear, which DES ignores.
fn expand_des_key(key: &[u8]) -> [u8; 8] {
    debug_assert!(key.len() >= 7);
    [
        key[0] & 0xfe,
        ((key[0] << 7) | (key[1] >> 1)) & 0xfe,
        ((key[1] << 6) | (key[2] >> 2)) & 0xfe,
        ((key[2] << 5) | (key[3] >> 3)) & 0xfe,
        ((key[3] << 4) | (key[4] >> 4)) & 0xfe,
        ((key[4] << 3) | (key[5] >> 5)) & 0xfe,
        ((key[5] << 2) | (key[6] >> 6)) & 0xfe,
        (key[6] << 1) & 0xfe,
    ]
}

fn des_encrypt(key7: &[u8], block: &[u8; 8]) -> [u8; 8] {
    let key = expand_des_key(key7);
    let cipher = Des::new(&key.into());
    let mut out = (*block).into();
    cipher.encrypt_block(&mut out);
    out.into()
}

/// The 24-octet challenge response: the password hash padded to 21 octets
/// and applied to the challenge as three DES encryptions.
fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; NT_RESPONSE_LEN] {
    let mut z_hash = [0u8; 21];
    z_hash[..16].copy_from_slice(password_hash);

    let mut response = [0u8; NT_RESPONSE_LEN];
    response[0..8].copy_from_slice(&des_encrypt(&z_hash[0..7], challenge));
    response[8..16].copy_from_slice(&des_encrypt(&z_hash[7..14], challenge));
    response[16..24].copy_from_slice(&des_encrypt(&z_hash[14..21], challenge));
    response
}

/// The name a peer authenticates as, without the `DOMAIN\` prefix.
fn strip_domain(username: &str) -> &str {
    match username.rfind('\\') {
        Some(index) => &username[index + 1..],
        None => username,
    }
}

/// The 8-octet challenge hash of MS-CHAPv2 (RFC 2759 §8.2).
fn challenge_hash(
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    username: &str,
) -> [u8; 8] {
    let mut sha = Sha1::new();
    sha.update(peer_challenge);
    sha.update(auth_challenge);
    sha.update(strip_domain(username).as_bytes());
    let digest = sha.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// The MS-CHAP NT-Response.
pub fn nt_response_v1(challenge: &[u8; 8], password: &str) -> [u8; NT_RESPONSE_LEN] {
    challenge_response(challenge, &mppe::nt_password_hash(password))
}

/// The MS-CHAPv2 NT-Response.
pub fn nt_response_v2(
    auth_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    username: &str,
    password: &str,
) -> [u8; NT_RESPONSE_LEN] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    challenge_response(&challenge, &mppe::nt_password_hash(password))
}

/// The 40 hex characters of the MS-CHAPv2 authenticator response.
pub fn authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LEN],
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    username: &str,
) -> [u8; AUTH_RESPONSE_LEN] {
    let mut sha = Sha1::new();
    sha.update(mppe::password_hash_hash(password));
    sha.update(nt_response);
    sha.update(MAGIC1);
    let digest = sha.finalize();

    let challenge = challenge_hash(peer_challenge, auth_challenge, username);

    let mut sha = Sha1::new();
    sha.update(digest);
    sha.update(challenge);
    sha.update(MAGIC2);
    let digest = sha.finalize();

    let mut out = [0u8; AUTH_RESPONSE_LEN];
    for (pair, byte) in out.chunks_mut(2).zip(digest.iter()) {
        pair.copy_from_slice(&hex_upper(*byte));
    }
    out
}

fn hex_upper(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[usize::from(byte >> 4)], DIGITS[usize::from(byte & 0xf)]]
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let pair = hex_upper(*byte);
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// The parsed fields of a failure message.
///
/// Grammar: `"E=" errno " R=" retry " C=" chall_hex " V=" vers (" M=" text)?`
/// where every field after the error code is optional in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub code: u16,
    /// Whether the authenticator permits another attempt.
    pub retry: bool,
    /// The challenge to use for the retry, when given.
    pub challenge: Option<Vec<u8>>,
    /// The change-password protocol version, 0 when absent.
    pub version: u16,
    /// The free-text part, when given.
    pub message: Option<String>,
}

/// The canned description of a recognized failure code.
pub fn failure_text(code: u16) -> Option<&'static str> {
    match code {
        ERROR_RESTRICTED_LOGON_HOURS => Some("E=646 Restricted logon hours"),
        ERROR_ACCT_DISABLED => Some("E=647 Account disabled"),
        ERROR_PASSWD_EXPIRED => Some("E=648 Password expired"),
        ERROR_NO_DIALIN_PERMISSION => Some("E=649 No dialin permission"),
        ERROR_AUTHENTICATION_FAILURE => Some("E=691 Authentication failure"),
        ERROR_CHANGING_PASSWORD => Some("E=709 Error changing password"),
        _ => None,
    }
}

/// Parse a failure message.
///
/// Unknown error codes parse fine and are the caller's judgement call;
/// a message that does not start with `E=` is a protocol violation.
pub fn parse_failure(message: &str) -> Result<FailureInfo, Error> {
    let rest = message.strip_prefix("E=").ok_or(Error::ProtocolError)?;
    let end = rest.find(' ').unwrap_or(rest.len());
    let code: u16 = rest[..end].parse().map_err(|_| Error::ProtocolError)?;

    let mut info = FailureInfo {
        code,
        retry: false,
        challenge: None,
        version: 0,
        message: None,
    };

    let mut rest = &rest[end..];
    while let Some(stripped) = rest.strip_prefix(' ') {
        if let Some(text) = stripped.strip_prefix("M=") {
            // The free text runs to the end of the message.
            info.message = Some(String::from(text));
            break;
        } else if let Some(value) = stripped.strip_prefix("R=") {
            let end = value.find(' ').unwrap_or(value.len());
            info.retry = &value[..end] == "1";
            rest = &value[end..];
        } else if let Some(value) = stripped.strip_prefix("C=") {
            let end = value.find(' ').unwrap_or(value.len());
            info.challenge = from_hex(&value[..end]);
            rest = &value[end..];
        } else if let Some(value) = stripped.strip_prefix("V=") {
            let end = value.find(' ').unwrap_or(value.len());
            info.version = value[..end].parse().unwrap_or(0);
            rest = &value[end..];
        } else {
            return Err(Error::ProtocolError);
        }
    }

    Ok(info)
}

/// The protocol spoken by a [`Session`].
///
/// [`Session`]: struct.Session.html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    MsChap,
    MsChapV2,
}

/// Which end of the exchange this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authenticator,
    Authenticatee,
}

/// The progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    ChallengeSent,
    ResponseSent,
    Success,
    Failure,
}

/// One authentication exchange.
///
/// The authenticator generates a challenge, verifies the peer response and
/// answers with the success or failure message. The authenticatee turns a
/// received challenge into a response and then checks the authenticator's
/// answer. Either way, a session that reaches [`State::Success`] holds the
/// MPPE session keys for the link.
///
/// [`State::Success`]: enum.State.html#variant.Success
pub struct Session {
    role: Role,
    version: Version,
    username: String,
    secret: String,
    state: State,
    /// The authenticator challenge value as last seen on the wire.
    challenge: Vec<u8>,
    /// The NT-Response last produced or accepted.
    response: Vec<u8>,
    /// What the authenticator must answer to prove itself (v2,
    /// authenticatee only).
    expected_auth: Option<[u8; AUTH_RESPONSE_LEN]>,
    keys: Option<MppeKeys>,
}

impl Session {
    /// Open a session; `username` names the authenticating peer.
    pub fn new(role: Role, version: Version, username: &str, secret: &str) -> Self {
        Session {
            role,
            version,
            username: String::from(username),
            secret: String::from(secret),
            state: State::Init,
            challenge: Vec::new(),
            response: Vec::new(),
            expected_auth: None,
            keys: None,
        }
    }

    /// The progress of the exchange.
    pub fn state(&self) -> State {
        self.state
    }

    /// The derived session keys, present from success on.
    pub fn keys(&self) -> Option<&MppeKeys> {
        self.keys.as_ref()
    }

    /// The last NT-Response seen or produced.
    pub fn nt_response(&self) -> &[u8] {
        &self.response
    }

    /// Produce the challenge value, `[len]` followed by `len` random
    /// octets.
    ///
    /// Authenticator only.
    pub fn generate_challenge(&mut self, rng: &mut Rng) -> Result<Vec<u8>, Error> {
        if self.role != Role::Authenticator {
            return Err(Error::InvalidArg);
        }
        let len = match self.version {
            Version::MsChap => V1_CHALLENGE_LEN,
            Version::MsChapV2 => V2_CHALLENGE_LEN,
        };
        let mut challenge = Vec::new();
        challenge.resize(1 + len, 0);
        challenge[0] = len as u8;
        rng.fill(&mut challenge[1..]);

        self.challenge = challenge[1..].to_vec();
        self.state = State::ChallengeSent;
        Ok(challenge)
    }

    /// Check the peer's response value (including its leading length
    /// octet) and produce the message for the Success or Failure packet.
    ///
    /// Authenticator only. The returned flag says which packet to send;
    /// on success the session keys are armed.
    pub fn verify_response(&mut self, response: &[u8]) -> (bool, String) {
        if self.role != Role::Authenticator || self.state != State::ChallengeSent {
            return (false, self.failure_message());
        }
        let ok = match self.version {
            Version::MsChap => self.verify_response_v1(response),
            Version::MsChapV2 => self.verify_response_v2(response),
        };
        if let Some(message) = ok {
            self.state = State::Success;
            (true, message)
        } else {
            self.state = State::Failure;
            (false, self.failure_message())
        }
    }

    fn failure_message(&self) -> String {
        let mut message = String::from("E=691 R=1 C=");
        message.push_str(&to_hex(&self.challenge));
        message.push_str(" V=0 M=Access denied");
        message
    }

    fn verify_response_v1(&mut self, response: &[u8]) -> Option<String> {
        if response.len() != 1 + RESPONSE_LEN || usize::from(response[0]) != RESPONSE_LEN {
            return None;
        }
        let value = &response[1..];
        if value[V1_USE_NT_OFFSET] == 0 {
            // LANMAN-only authentication is not supported.
            net_log_reject("peer request for LANMAN auth not supported");
            return None;
        }

        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&self.challenge);
        let expected = nt_response_v1(&challenge, &self.secret);
        let given = &value[V1_NT_OFFSET..V1_NT_OFFSET + NT_RESPONSE_LEN];
        if !bool::from(expected.ct_eq(given)) {
            return None;
        }

        self.response = expected.to_vec();
        self.keys = Some(mppe::mschap1_keys(&self.secret, &challenge));
        Some(String::from("Access granted"))
    }

    fn verify_response_v2(&mut self, response: &[u8]) -> Option<String> {
        if response.len() != 1 + RESPONSE_LEN || usize::from(response[0]) != RESPONSE_LEN {
            return None;
        }
        let value = &response[1..];
        let mut peer_challenge = [0u8; 16];
        peer_challenge
            .copy_from_slice(&value[V2_PEER_CHALLENGE_OFFSET..V2_PEER_CHALLENGE_OFFSET + 16]);
        let flags = value[V2_FLAGS_OFFSET];

        let mut auth_challenge = [0u8; 16];
        auth_challenge.copy_from_slice(&self.challenge);
        let expected =
            nt_response_v2(&auth_challenge, &peer_challenge, &self.username, &self.secret);
        let given = &value[V2_NT_OFFSET..V2_NT_OFFSET + NT_RESPONSE_LEN];
        if !bool::from(expected.ct_eq(given)) {
            return None;
        }

        let auth_response = authenticator_response(
            &self.secret, &expected, &peer_challenge, &auth_challenge, &self.username,
        );
        self.response = expected.to_vec();
        self.keys = Some(mppe::mschap2_keys(&self.secret, &expected, true));

        let mut message = String::from("S=");
        message.push_str(core::str::from_utf8(&auth_response).expect("hex is ascii"));
        if flags == 0 {
            // A conforming peer gets the RFC-required text; a peer that
            // sets the flags octet (win98) trips over it.
            message.push_str(" M=Access granted");
        }
        Some(message)
    }

    /// Turn a received challenge value (including its leading length
    /// octet) into the response value to send, `[49]` followed by the
    /// response.
    ///
    /// Authenticatee only.
    pub fn make_response(&mut self, challenge: &[u8], rng: &mut Rng) -> Result<Vec<u8>, Error> {
        if self.role != Role::Authenticatee {
            return Err(Error::InvalidArg);
        }
        match self.version {
            Version::MsChap => self.make_response_v1(challenge),
            Version::MsChapV2 => self.make_response_v2(challenge, rng),
        }
    }

    fn make_response_v1(&mut self, challenge: &[u8]) -> Result<Vec<u8>, Error> {
        if challenge.len() < 1 + V1_CHALLENGE_LEN
            || usize::from(challenge[0]) != V1_CHALLENGE_LEN
        {
            return Err(Error::ProtocolError);
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(&challenge[1..9]);
        self.challenge = value.to_vec();

        let nt = nt_response_v1(&value, &self.secret);
        self.response = nt.to_vec();
        // v1 keys derive from the challenge alone; arm them right away.
        self.keys = Some(mppe::mschap1_keys(&self.secret, &value));

        let mut out = Vec::new();
        out.resize(1 + RESPONSE_LEN, 0);
        out[0] = RESPONSE_LEN as u8;
        out[1 + V1_NT_OFFSET..1 + V1_NT_OFFSET + NT_RESPONSE_LEN].copy_from_slice(&nt);
        out[1 + V1_USE_NT_OFFSET] = 1;
        self.state = State::ResponseSent;
        Ok(out)
    }

    fn make_response_v2(&mut self, challenge: &[u8], rng: &mut Rng) -> Result<Vec<u8>, Error> {
        if challenge.len() < 1 + V2_CHALLENGE_LEN
            || usize::from(challenge[0]) != V2_CHALLENGE_LEN
        {
            return Err(Error::ProtocolError);
        }
        let mut auth_challenge = [0u8; 16];
        auth_challenge.copy_from_slice(&challenge[1..17]);
        self.challenge = auth_challenge.to_vec();

        let mut peer_challenge = [0u8; 16];
        rng.fill(&mut peer_challenge);

        let nt = nt_response_v2(&auth_challenge, &peer_challenge, &self.username, &self.secret);
        self.response = nt.to_vec();
        self.expected_auth = Some(authenticator_response(
            &self.secret, &nt, &peer_challenge, &auth_challenge, &self.username,
        ));
        self.keys = Some(mppe::mschap2_keys(&self.secret, &nt, false));

        let mut out = Vec::new();
        out.resize(1 + RESPONSE_LEN, 0);
        out[0] = RESPONSE_LEN as u8;
        out[1 + V2_PEER_CHALLENGE_OFFSET..1 + V2_PEER_CHALLENGE_OFFSET + 16]
            .copy_from_slice(&peer_challenge);
        out[1 + V2_NT_OFFSET..1 + V2_NT_OFFSET + NT_RESPONSE_LEN].copy_from_slice(&nt);
        self.state = State::ResponseSent;
        Ok(out)
    }

    /// Check the success message of the authenticator.
    ///
    /// For MS-CHAPv2 the message must carry the matching `S=` mutual
    /// authentication; the ` M=` text is optional. MS-CHAP has no mutual
    /// authentication, any success concludes the exchange.
    pub fn check_success(&mut self, message: &str) -> Result<(), Error> {
        if self.role != Role::Authenticatee || self.state != State::ResponseSent {
            return Err(Error::InvalidArg);
        }
        if self.version == Version::MsChap {
            self.state = State::Success;
            return Ok(());
        }

        let rest = match message.strip_prefix("S=") {
            Some(rest) if rest.len() >= AUTH_RESPONSE_LEN => rest,
            _ => {
                // Packet does not start with "S=" or is short.
                self.state = State::Failure;
                return Err(Error::ProtocolError);
            }
        };
        let expected = self.expected_auth.as_ref().ok_or(Error::InvalidArg)?;
        let given = &rest.as_bytes()[..AUTH_RESPONSE_LEN];
        if !bool::from(expected.ct_eq(given)) {
            // Mutual authentication failed.
            self.state = State::Failure;
            self.keys = None;
            return Err(Error::AuthFailure(ERROR_AUTHENTICATION_FAILURE));
        }
        let trailer = &rest.as_bytes()[AUTH_RESPONSE_LEN..];
        if !trailer.is_empty() && !trailer.starts_with(b" M=") {
            // Extra text that is not the message field.
            self.state = State::Failure;
            return Err(Error::ProtocolError);
        }

        self.state = State::Success;
        Ok(())
    }

    /// Digest the failure message of the authenticator.
    ///
    /// Recognized codes surface as [`Error::AuthFailure`]; anything else is
    /// a protocol violation terminating the exchange.
    ///
    /// [`Error::AuthFailure`]: ../../ustack/layer/enum.Error.html
    pub fn handle_failure(&mut self, message: &str) -> Error {
        self.state = State::Failure;
        self.keys = None;
        match parse_failure(message) {
            Ok(info) if failure_text(info.code).is_some() => Error::AuthFailure(info.code),
            Ok(_) | Err(_) => Error::ProtocolError,
        }
    }

    /// Answer a change-password request, which this implementation never
    /// initiates and never accepts.
    pub fn reject_change_password(&mut self) -> String {
        self.state = State::Failure;
        let mut message = String::from("E=709 R=0 C=");
        message.push_str(&to_hex(&self.challenge));
        message.push_str(" V=0 M=Change password not supported");
        message
    }
}

#[cfg(not(feature = "log"))]
fn net_log_reject(_reason: &str) {}

#[cfg(feature = "log")]
fn net_log_reject(reason: &str) {
    log::info!("{}", reason);
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(text: &str) -> Vec<u8> {
        from_hex(text).unwrap()
    }

    // The worked example of RFC 2759 §9.2.
    const USER: &str = "User";
    const PASSWORD: &str = "clientPass";
    const AUTH_CHALLENGE: &str = "5B5D7C7D7B3F2F3E3C2C602132262628";
    const PEER_CHALLENGE: &str = "21402324255E262A28295F2B3A337C7E";
    const NT_RESPONSE: &str = "82309ECD8D708B5EA08FAA3981CD83544233114A3D85D6DF";
    const AUTH_RESPONSE: &str = "S=407A5589115FD0D6209F510FE9C04566932CDA56";

    fn challenge16(text: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex(text));
        out
    }

    #[test]
    fn rfc2759_nt_password_hash() {
        assert_eq!(
            crate::mppe::nt_password_hash(PASSWORD).to_vec(),
            hex("44EBBA8D5312B8D611474411F56989AE")
        );
    }

    #[test]
    fn rfc2759_nt_response() {
        let response = nt_response_v2(
            &challenge16(AUTH_CHALLENGE),
            &challenge16(PEER_CHALLENGE),
            USER,
            PASSWORD,
        );
        assert_eq!(response.to_vec(), hex(NT_RESPONSE));
    }

    #[test]
    fn rfc2759_authenticator_response() {
        let mut nt = [0u8; 24];
        nt.copy_from_slice(&hex(NT_RESPONSE));
        let auth = authenticator_response(
            PASSWORD,
            &nt,
            &challenge16(PEER_CHALLENGE),
            &challenge16(AUTH_CHALLENGE),
            USER,
        );
        assert_eq!(&auth[..], &AUTH_RESPONSE.as_bytes()[2..]);
    }

    #[test]
    fn domain_is_stripped_at_last_backslash() {
        assert_eq!(strip_domain("BIGCO\\User"), "User");
        assert_eq!(strip_domain("BIGCO\\sub\\User"), "User");
        assert_eq!(strip_domain("User"), "User");
        // The hash only covers the bare user name.
        let with_domain = nt_response_v2(
            &challenge16(AUTH_CHALLENGE),
            &challenge16(PEER_CHALLENGE),
            "BIGCO\\User",
            PASSWORD,
        );
        assert_eq!(with_domain.to_vec(), hex(NT_RESPONSE));
    }

    #[test]
    fn v2_exchange_end_to_end() {
        let mut rng = Rng::from_seed(0x0219);
        let mut server = Session::new(Role::Authenticator, Version::MsChapV2, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChapV2, USER, PASSWORD);

        let challenge = server.generate_challenge(&mut rng).unwrap();
        assert_eq!(challenge.len(), 17);
        assert_eq!(challenge[0], 16);
        assert_eq!(server.state(), State::ChallengeSent);

        let response = client.make_response(&challenge, &mut rng).unwrap();
        assert_eq!(response.len(), 50);
        assert_eq!(response[0], 49);
        assert_eq!(client.state(), State::ResponseSent);

        let (ok, message) = server.verify_response(&response);
        assert!(ok, "authentication accepted");
        assert_eq!(server.state(), State::Success);

        client.check_success(&message).unwrap();
        assert_eq!(client.state(), State::Success);

        // Mirrored MPPE keys on both ends.
        let server_keys = server.keys().unwrap();
        let client_keys = client.keys().unwrap();
        assert_eq!(server_keys.send, client_keys.recv);
        assert_eq!(server_keys.recv, client_keys.send);
    }

    #[test]
    fn v2_wrong_password_fails() {
        let mut rng = Rng::from_seed(7);
        let mut server = Session::new(Role::Authenticator, Version::MsChapV2, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChapV2, USER, "wrong");

        let challenge = server.generate_challenge(&mut rng).unwrap();
        let response = client.make_response(&challenge, &mut rng).unwrap();
        let (ok, message) = server.verify_response(&response);
        assert!(!ok);
        assert_eq!(server.state(), State::Failure);
        assert!(server.keys().is_none());

        let err = client.handle_failure(&message);
        assert_eq!(err, Error::AuthFailure(691));
        assert_eq!(client.state(), State::Failure);
    }

    #[test]
    fn success_without_message_field_is_accepted() {
        let mut rng = Rng::from_seed(11);
        let mut server = Session::new(Role::Authenticator, Version::MsChapV2, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChapV2, USER, PASSWORD);

        let challenge = server.generate_challenge(&mut rng).unwrap();
        let mut response = client.make_response(&challenge, &mut rng).unwrap();
        // A win98-style peer flags itself; the success answer then omits
        // the " M=" field.
        response[1 + V2_FLAGS_OFFSET] = 0x04;
        let (ok, message) = server.verify_response(&response);
        assert!(ok);
        assert!(!message.contains(" M="));
        client.check_success(&message).unwrap();
    }

    #[test]
    fn success_with_garbage_trailer_is_rejected() {
        let mut rng = Rng::from_seed(13);
        let mut server = Session::new(Role::Authenticator, Version::MsChapV2, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChapV2, USER, PASSWORD);

        let challenge = server.generate_challenge(&mut rng).unwrap();
        let response = client.make_response(&challenge, &mut rng).unwrap();
        let (_, mut message) = server.verify_response(&response);
        message.truncate(2 + AUTH_RESPONSE_LEN);
        message.push_str(" not-the-message-field");
        assert_eq!(client.check_success(&message), Err(Error::ProtocolError));
    }

    #[test]
    fn v1_exchange_end_to_end() {
        let mut rng = Rng::from_seed(0x0433);
        let mut server = Session::new(Role::Authenticator, Version::MsChap, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChap, USER, PASSWORD);

        let challenge = server.generate_challenge(&mut rng).unwrap();
        assert_eq!(challenge.len(), 9);
        assert_eq!(challenge[0], 8);

        let response = client.make_response(&challenge, &mut rng).unwrap();
        // The LANMAN half stays zeroed, the use-NT flag is set.
        assert!(response[1..25].iter().all(|byte| *byte == 0));
        assert_eq!(response[1 + V1_USE_NT_OFFSET], 1);

        let (ok, _message) = server.verify_response(&response);
        assert!(ok);
        client.check_success("").unwrap();

        // The v1 start key is shared in both directions, on both ends.
        let keys = server.keys().unwrap();
        assert_eq!(keys.send, keys.recv);
        assert_eq!(keys.send, client.keys().unwrap().send);
    }

    #[test]
    fn v1_lanman_only_response_is_rejected() {
        let mut rng = Rng::from_seed(5);
        let mut server = Session::new(Role::Authenticator, Version::MsChap, USER, PASSWORD);
        let mut client = Session::new(Role::Authenticatee, Version::MsChap, USER, PASSWORD);

        let challenge = server.generate_challenge(&mut rng).unwrap();
        let mut response = client.make_response(&challenge, &mut rng).unwrap();
        response[1 + V1_USE_NT_OFFSET] = 0;
        let (ok, message) = server.verify_response(&response);
        assert!(!ok);
        assert!(message.starts_with("E=691 R=1 C="));
    }

    #[test]
    fn failure_parsing() {
        let info = parse_failure(
            "E=648 R=1 C=5B5D7C7D7B3F2F3E3C2C602132262628 V=3 M=Password expired",
        ).unwrap();
        assert_eq!(info.code, 648);
        assert!(info.retry);
        assert_eq!(info.challenge, Some(hex("5B5D7C7D7B3F2F3E3C2C602132262628")));
        assert_eq!(info.version, 3);
        assert_eq!(info.message.as_deref(), Some("Password expired"));

        // The message field is optional.
        let info = parse_failure("E=691 R=0 C=00 V=0").unwrap();
        assert_eq!(info.code, 691);
        assert!(!info.retry);
        assert_eq!(info.message, None);

        // A bare code parses too.
        assert_eq!(parse_failure("E=709").unwrap().code, 709);

        assert_eq!(parse_failure("S=nothing"), Err(Error::ProtocolError));
    }

    #[test]
    fn unknown_failure_code_terminates() {
        let mut session = Session::new(Role::Authenticatee, Version::MsChapV2, USER, PASSWORD);
        assert_eq!(session.handle_failure("E=123 R=1"), Error::ProtocolError);
        assert_eq!(session.handle_failure("E=646"), Error::AuthFailure(646));
    }

    #[test]
    fn change_password_is_refused() {
        let mut session = Session::new(Role::Authenticator, Version::MsChapV2, USER, PASSWORD);
        let mut rng = Rng::from_seed(3);
        session.generate_challenge(&mut rng).unwrap();
        let message = session.reject_change_password();
        assert!(message.starts_with("E=709"));
        assert_eq!(session.state(), State::Failure);
        // The refusal itself parses under the failure grammar.
        assert_eq!(parse_failure(&message).unwrap().code, 709);
    }
}
