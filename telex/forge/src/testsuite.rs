//! Known-answer tests of whole records, checked against an independent TLS 1.2 implementation.
//!
//! Every session here uses the master key `01 00 .. 00`, a client random of all `0xAA` bytes
//! and a server random of all `0xBB` bytes.

use crate::{
    config::StationConfig,
    errors::*,
    session::{forge, ForgedSession, MasterKey, Role},
    tls::{ClientRandom, SequenceNumber, ServerRandom},
};

fn session(role: Role, suite: u16) -> ForgedSession {
    let mut master = [0; 48];
    master[0] = 1;
    let config = StationConfig::builder().role(role).build().unwrap();
    forge(
        &config,
        suite,
        &ClientRandom([0xaa; 32]),
        &ServerRandom([0xbb; 32]),
        &MasterKey::new(&master).unwrap(),
    )
    .unwrap()
}

fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

// Client-to-server records, with explicit IVs 00..0f and 10..1f.
const CBC_SHA_HELLO: &str = "1703030030000102030405060708090a0b0c0d0e0fb98f942de0050f137083ab\
    7c053824d6f2b1717e7a31c2d724236708f2196207";
const CBC_SHA_WORLD: &str = "1703030030101112131415161718191a1b1c1d1e1f9303c8a27ef6c376469892\
    4419f2a3c470d0a3c4cfc3b27629938a8f506e15ea";

const GCM_CLIENT_HELLO: &str =
    "170303001d0000000000000001846a411a578eea2dd3db40955b7712bf62756fea92";
const GCM_SERVER_HELLO: &str =
    "170303001d0000000000000001c9c5f7b2d045c5dc42e2ae40b414ddcfd17e161658";
const GCM_SERVER_CLOSE_NOTIFY: &str =
    "150303001a0000000000000002c876601faac997f9e98936db2e66a8b635f4";

const CHACHA_CLIENT_HELLO: &str = "1703030015c1da21df9ad9e87731a052723dffc1ee4b871260bc";
const CHACHA_SERVER_HELLO: &str = "17030300155f65d5d09c1b50201d4ca670949d533754c0a7e12d";

#[test]
fn test_cbc_known_records() {
    let mut server = session(Role::Server, 0x002f);
    assert_eq!(server.decrypt(&unhex(CBC_SHA_HELLO)).unwrap(), b"hello");
    assert_eq!(server.read_sequence(), SequenceNumber(2));
    assert_eq!(server.decrypt(&unhex(CBC_SHA_WORLD)).unwrap(), b"world");
    assert_eq!(server.read_sequence(), SequenceNumber(3));
}

#[test]
fn test_cbc_known_records_together() {
    let mut server = session(Role::Server, 0x002f);
    let mut wire = unhex(CBC_SHA_HELLO);
    wire.extend(unhex(CBC_SHA_WORLD));
    assert_eq!(server.decrypt(&wire).unwrap(), b"helloworld");
}

#[test]
fn test_cbc_records_out_of_order() {
    let mut server = session(Role::Server, 0x002f);
    let err = server.decrypt(&unhex(CBC_SHA_WORLD)).unwrap_err();
    assert!(matches!(err, StationError::BadRecordMac { .. }));
    assert_eq!(err.kind(), ErrorKind::TransformFailure);
}

#[test]
fn test_gcm_known_records() {
    let mut server = session(Role::Server, 0x009c);
    assert_eq!(server.encrypt(b"hello").unwrap(), unhex(GCM_SERVER_HELLO));
    assert_eq!(server.decrypt(&unhex(GCM_CLIENT_HELLO)).unwrap(), b"hello");
    assert_eq!(server.shutdown().unwrap(), unhex(GCM_SERVER_CLOSE_NOTIFY));

    let mut client = session(Role::Client, 0x009c);
    assert_eq!(client.encrypt(b"hello").unwrap(), unhex(GCM_CLIENT_HELLO));
    assert_eq!(client.decrypt(&unhex(GCM_SERVER_HELLO)).unwrap(), b"hello");
    assert_eq!(client.decrypt(&unhex(GCM_SERVER_CLOSE_NOTIFY)).unwrap(), b"");
    assert!(client.reader.peer_closed());
}

#[test]
fn test_chacha_known_records() {
    let mut server = session(Role::Server, 0xcca8);
    assert_eq!(server.encrypt(b"hello").unwrap(), unhex(CHACHA_SERVER_HELLO));
    assert_eq!(server.decrypt(&unhex(CHACHA_CLIENT_HELLO)).unwrap(), b"hello");

    let mut client = session(Role::Client, 0xcca8);
    assert_eq!(client.encrypt(b"hello").unwrap(), unhex(CHACHA_CLIENT_HELLO));
    assert_eq!(client.decrypt(&unhex(CHACHA_SERVER_HELLO)).unwrap(), b"hello");
}

#[test]
fn test_wrong_role_cannot_read_known_records() {
    let mut server = session(Role::Server, 0x009c);
    let err = server.decrypt(&unhex(GCM_SERVER_HELLO)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransformFailure);
    // The failed record is left behind, so the session stays desynchronized.
    let err = server.decrypt(&unhex(GCM_CLIENT_HELLO)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolDesync);
}
