//! Server name extraction from a TLS ClientHello.
//!
//! The router only ever sees the first read of an HTTPS connection and never
//! terminates TLS, so the hostname has to come from the cleartext SNI
//! extension. A ClientHello spread over several reads is not reassembled.

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const RANDOM_LEN: usize = 32;

/// Largest buffer worth reading for a ClientHello: one full TLS record.
pub const MAX_CLIENT_HELLO_LEN: usize = RECORD_HEADER_LEN + (1 << 14);

/// Bounds-checked forward reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(bytes)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }
}

/// Return the host name from the SNI extension of the ClientHello at the
/// start of `data`, lowercased.
///
/// Returns `None` for anything that is not a well-formed ClientHello
/// carrying a `host_name` entry within `data`; the caller must then drop the
/// connection rather than guess a destination.
pub fn extract_sni(data: &[u8]) -> Option<String> {
    let mut cur = Cursor::new(data);

    if cur.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    cur.skip(RECORD_HEADER_LEN - 1)?;

    if cur.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    cur.skip(HANDSHAKE_HEADER_LEN - 1)?;

    cur.skip(2)?; // client_version
    cur.skip(RANDOM_LEN)?;

    let session_id_len = cur.u8()? as usize;
    cur.skip(session_id_len)?;

    let cipher_suites_len = cur.u16()? as usize;
    cur.skip(cipher_suites_len)?;

    let compression_len = cur.u8()? as usize;
    cur.skip(compression_len)?;

    let extensions_len = cur.u16()? as usize;
    let mut extensions = Cursor::new(cur.take(extensions_len)?);

    while extensions.pos < extensions.data.len() {
        let ext_type = extensions.u16()?;
        let ext_len = extensions.u16()? as usize;
        let body = extensions.take(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(body);
        }
    }

    None
}

fn parse_server_name(body: &[u8]) -> Option<String> {
    let mut cur = Cursor::new(body);

    let _list_len = cur.u16()?;
    if cur.u8()? != NAME_TYPE_HOST_NAME {
        return None;
    }
    let name_len = cur.u16()? as usize;
    let name = cur.take(name_len)?;

    if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
        return None;
    }

    Some(String::from_utf8_lossy(name).to_ascii_lowercase())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn extension(out: &mut Vec<u8>, ext_type: u16, body: &[u8]) {
        out.extend_from_slice(&ext_type.to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
    }

    fn sni_body(name_type: u8, name: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        body.push(name_type);
        body.extend_from_slice(&(name.len() as u16).to_be_bytes());
        body.extend_from_slice(name);
        body
    }

    fn client_hello_with_extensions(extensions: &[u8]) -> Vec<u8> {
        let mut hello = Vec::new();
        hello.extend_from_slice(&[0x03, 0x03]); // client_version
        hello.extend_from_slice(&[0xAB; RANDOM_LEN]);
        hello.push(32); // session_id
        hello.extend_from_slice(&[0x11; 32]);
        hello.extend_from_slice(&4u16.to_be_bytes()); // cipher_suites
        hello.extend_from_slice(&[0x13, 0x01, 0x13, 0x02]);
        hello.push(1); // compression_methods
        hello.push(0);
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(extensions);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    /// A ClientHello with a couple of unrelated extensions around the SNI.
    pub(crate) fn client_hello(host: &str) -> Vec<u8> {
        let mut extensions = Vec::new();
        extension(&mut extensions, 0x000A, &[0x00, 0x02, 0x00, 0x1D]); // supported_groups
        extension(&mut extensions, EXTENSION_SERVER_NAME, &sni_body(0, host.as_bytes()));
        extension(&mut extensions, 0x0010, &[0x00, 0x03, 0x02, b'h', b'2']); // ALPN
        client_hello_with_extensions(&extensions)
    }

    #[test]
    fn extracts_server_name() {
        assert_eq!(extract_sni(&client_hello("www.Example.com")).as_deref(), Some("www.example.com"));
    }

    #[test]
    fn rejects_non_handshake_record() {
        let mut data = client_hello("example.com");
        data[0] = 0x17;

        assert_eq!(extract_sni(&data), None);
    }

    #[test]
    fn rejects_non_client_hello() {
        let mut data = client_hello("example.com");
        data[RECORD_HEADER_LEN] = 0x02;

        assert_eq!(extract_sni(&data), None);
    }

    #[test]
    fn missing_server_name_extension() {
        let mut extensions = Vec::new();
        extension(&mut extensions, 0x000A, &[0x00, 0x02, 0x00, 0x1D]);

        assert_eq!(extract_sni(&client_hello_with_extensions(&extensions)), None);
    }

    #[test]
    fn unsupported_name_type() {
        let mut extensions = Vec::new();
        extension(&mut extensions, EXTENSION_SERVER_NAME, &sni_body(1, b"example.com"));

        assert_eq!(extract_sni(&client_hello_with_extensions(&extensions)), None);
    }

    #[test]
    fn truncated_at_every_offset_never_panics() {
        let data = client_hello("example.com");
        for len in 0..data.len() {
            assert_eq!(extract_sni(&data[..len]), None, "len {len}");
        }
    }

    #[test]
    fn oversized_extension_length_is_rejected() {
        let mut extensions = Vec::new();
        extension(&mut extensions, EXTENSION_SERVER_NAME, &sni_body(0, b"example.com"));
        let mut data = client_hello_with_extensions(&extensions);
        // Claim a longer server_name extension than is present.
        let ext_len_at = data.len() - extensions.len() + 2;
        data[ext_len_at..ext_len_at + 2].copy_from_slice(&0x0400u16.to_be_bytes());

        assert_eq!(extract_sni(&data), None);
    }

    #[test]
    fn empty_host_name_is_rejected() {
        let mut extensions = Vec::new();
        extension(&mut extensions, EXTENSION_SERVER_NAME, &sni_body(0, b""));

        assert_eq!(extract_sni(&client_hello_with_extensions(&extensions)), None);
    }
}
