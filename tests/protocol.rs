//! End-to-end protocol tests against a real `TcpListener`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread;
use tempfile::tempdir;
use vaultd::{Server, ServerConfig};

fn spawn_server(data_dir: &Path, quota: u64) -> SocketAddr {
    let cfg = ServerConfig::from_iter([
        "vaultd".to_string(),
        "--bind".to_string(),
        "127.0.0.1:0".to_string(),
        "--data-dir".to_string(),
        data_dir.to_string_lossy().into_owned(),
        "--quota".to_string(),
        quota.to_string(),
    ]);
    let server = Server::bind(&cfg).expect("bind");
    let addr = server.local_addr().expect("local_addr");
    thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn connect(addr: SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(addr).expect("connect");
    let reader = BufReader::new(stream.try_clone().expect("clone"));
    (stream, reader)
}

fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).unwrap();
    stream.write_all(b"\n").unwrap();
}

fn recv_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read_line");
    line.trim_end_matches(['\r', '\n']).to_string()
}

#[test]
fn signup_then_login() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 1_000_000);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "ERR user_exists");

    send(&mut stream, "LOGIN alice");
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "LOGIN bob");
    assert_eq!(recv_line(&mut reader), "ERR no_such_user");
}

#[test]
fn upload_download_delete_round_trip() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 1_000_000);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "OK");

    let body = b"hello, world";
    send(&mut stream, &format!("UPLOAD alice greeting.txt {}", body.len()));
    stream.write_all(body).unwrap();
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "LIST alice");
    assert_eq!(recv_line(&mut reader), format!("greeting.txt {}", body.len()));
    assert_eq!(recv_line(&mut reader), "END");

    send(&mut stream, "DOWNLOAD alice greeting.txt");
    let header = recv_line(&mut reader);
    assert_eq!(header, format!("OK {}", body.len()));
    let mut got = vec![0u8; body.len()];
    reader.read_exact(&mut got).unwrap();
    assert_eq!(got, body);

    send(&mut stream, "DELETE alice greeting.txt");
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "DOWNLOAD alice greeting.txt");
    assert_eq!(recv_line(&mut reader), "ERR not_found");

    send(&mut stream, "DELETE alice greeting.txt");
    assert_eq!(recv_line(&mut reader), "ERR not_found");
}

#[test]
fn upload_rejected_over_quota() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 5);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "OK");

    let body = vec![b'x'; 10];
    send(&mut stream, &format!("UPLOAD alice big.txt {}", body.len()));
    stream.write_all(&body).unwrap();
    assert_eq!(recv_line(&mut reader), "ERR quota_exceeded");

    send(&mut stream, "LIST alice");
    assert_eq!(recv_line(&mut reader), "END");
}

#[test]
fn empty_file_is_listed_and_deletable() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 100);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "UPLOAD alice empty.txt 0");
    assert_eq!(recv_line(&mut reader), "OK");

    send(&mut stream, "LIST alice");
    assert_eq!(recv_line(&mut reader), "empty.txt 0");
    assert_eq!(recv_line(&mut reader), "END");

    send(&mut stream, "DELETE alice empty.txt");
    assert_eq!(recv_line(&mut reader), "OK");
}

#[test]
fn malformed_and_unknown_commands_get_inline_errors() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 100);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "SIGNUP");
    assert_eq!(recv_line(&mut reader), "ERR invalid_signup");

    send(&mut stream, "FROBNICATE alice");
    assert_eq!(recv_line(&mut reader), "ERR unknown_command");

    send(&mut stream, "DOWNLOAD alice");
    assert_eq!(recv_line(&mut reader), "ERR bad_download_syntax");

    // the connection survives malformed commands and keeps serving later ones
    send(&mut stream, "SIGNUP alice");
    assert_eq!(recv_line(&mut reader), "OK");
}

#[test]
fn operations_against_unknown_user_fail_cleanly() {
    let dir = tempdir().unwrap();
    let addr = spawn_server(dir.path(), 100);
    let (mut stream, mut reader) = connect(addr);

    send(&mut stream, "LIST ghost");
    assert_eq!(recv_line(&mut reader), "ERR user_not_found");

    send(&mut stream, "DOWNLOAD ghost a.txt");
    assert_eq!(recv_line(&mut reader), "ERR not_found");
}
