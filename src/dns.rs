//! DNS message parsing and construction.
//!
//! Only what the gateway needs: reading the first question of a query,
//! synthesizing redirect and server-failure replies, and pulling A/AAAA
//! answers out of an upstream response. Every reader is bounds-checked and
//! returns `None` on malformed input.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const HEADER_LEN: usize = 12;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Standard response, recursion desired and available, no error.
const FLAGS_RESPONSE_OK: [u8; 2] = [0x81, 0x80];
/// Same, with RCODE 2 (server failure).
const FLAGS_SERVFAIL: [u8; 2] = [0x81, 0x82];
/// Compression pointer to the question name at offset 12.
const NAME_POINTER: [u8; 2] = [0xC0, 0x0C];
const CLASS_IN: u16 = 1;

/// Query types the gateway tells apart. Anything else is carried as
/// `Unknown` and still classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Unknown(u16),
}

impl QueryType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::A,
            28 => Self::Aaaa,
            5 => Self::Cname,
            15 => Self::Mx,
            16 => Self::Txt,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Aaaa => 28,
            Self::Cname => 5,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Unknown(other) => other,
        }
    }

    /// A and AAAA are the only types the gateway answers with an address.
    pub fn is_address(self) -> bool {
        matches!(self, Self::A | Self::Aaaa)
    }
}

/// A parsed DNS query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    /// Lowercased QNAME with labels joined by `.`.
    pub domain: String,
    pub qtype: QueryType,
    pub qclass: u16,
    /// Offset one past the end of the first question (after QCLASS).
    question_end: usize,
}

impl DnsQuery {
    /// Parse the header and first question of a DNS query.
    ///
    /// Returns `None` if the header is short, the name is truncated or uses
    /// compression, or QTYPE/QCLASS are missing.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        let mut pos = HEADER_LEN;
        let mut labels: Vec<Cow<'_, str>> = Vec::new();

        loop {
            let label_len = *data.get(pos)? as usize;
            pos += 1;
            if label_len == 0 {
                break;
            }
            // Compression pointers and the reserved 0x40/0x80 forms never
            // appear in a question name. Label octets are arbitrary.
            if label_len > 63 {
                return None;
            }
            let label = data.get(pos..pos + label_len)?;
            labels.push(String::from_utf8_lossy(label));
            pos += label_len;
        }

        let fixed = data.get(pos..pos + 4)?;
        let qtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);

        Some(Self {
            id,
            domain: labels.join(".").to_lowercase(),
            qtype: QueryType::from_u16(qtype),
            qclass,
            question_end: pos + 4,
        })
    }

    /// Build a reply to `raw` (the bytes this query was parsed from) that
    /// points the name at the gateway itself.
    ///
    /// The question is copied verbatim and one answer is appended whose name
    /// is a pointer back to it: `ipv4` for A, `ipv6` for AAAA. Other query
    /// types get an empty answer section.
    pub fn redirect_response(&self, raw: &[u8], ipv4: Ipv4Addr, ipv6: Ipv6Addr, ttl: u32) -> Vec<u8> {
        let rdata: Option<Vec<u8>> = match self.qtype {
            QueryType::A => Some(ipv4.octets().to_vec()),
            QueryType::Aaaa => Some(ipv6.octets().to_vec()),
            _ => None,
        };

        let mut data = Vec::with_capacity(self.question_end + 32);

        // Header
        data.extend_from_slice(&raw[0..2]);
        data.extend_from_slice(&FLAGS_RESPONSE_OK);
        data.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        data.extend_from_slice(&u16::from(rdata.is_some()).to_be_bytes()); // ANCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        // Question
        data.extend_from_slice(&raw[HEADER_LEN..self.question_end]);

        // Answer
        if let Some(rdata) = rdata {
            data.extend_from_slice(&NAME_POINTER);
            data.extend_from_slice(&self.qtype.to_u16().to_be_bytes());
            data.extend_from_slice(&CLASS_IN.to_be_bytes());
            data.extend_from_slice(&ttl.to_be_bytes());
            data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&rdata);
        }

        data
    }
}

/// Header-only server-failure reply echoing the request's transaction id.
///
/// Requests shorter than a header are echoed back as far as they go.
pub fn error_response(request: &[u8]) -> Vec<u8> {
    let mut response = request[..request.len().min(HEADER_LEN)].to_vec();

    if response.len() >= 4 {
        response[2..4].copy_from_slice(&FLAGS_SERVFAIL);
    }
    if response.len() == HEADER_LEN {
        response[4..].fill(0);
    }

    response
}

/// Build a recursive query for `domain`.
pub fn build_query(id: u16, domain: &str, qtype: QueryType) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LEN + domain.len() + 6);

    data.extend_from_slice(&id.to_be_bytes());
    data.extend_from_slice(&[0x01, 0x00]); // Flags: recursion desired
    data.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    data.extend_from_slice(&[0x00; 6]); // Answer, Authority, Additional RRs

    encode_domain(&mut data, domain);
    data.extend_from_slice(&qtype.to_u16().to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());

    data
}

fn encode_domain(buf: &mut Vec<u8>, domain: &str) {
    for label in domain.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        let label = &label.as_bytes()[..label.len().min(63)];
        buf.push(label.len() as u8);
        buf.extend_from_slice(label);
    }
    buf.push(0);
}

/// Advance past a (possibly compressed) name starting at `pos`.
fn skip_name(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let b = *data.get(pos)?;
        if b == 0 {
            return Some(pos + 1);
        }
        if b & 0xC0 == 0xC0 {
            data.get(pos + 1)?;
            return Some(pos + 2);
        }
        pos += 1 + b as usize;
    }
}

/// Addresses found in a response, with the smallest TTL among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAnswers {
    pub addresses: Vec<IpAddr>,
    pub min_ttl: Option<u32>,
}

/// Extract the A (or AAAA) records of class IN from the answer section of
/// `response`. Records of other types, CNAMEs included, are skipped.
pub fn parse_address_answers(response: &[u8], qtype: QueryType) -> Option<AddressAnswers> {
    if response.len() < HEADER_LEN {
        return None;
    }

    let qdcount = u16::from_be_bytes([response[4], response[5]]) as usize;
    let ancount = u16::from_be_bytes([response[6], response[7]]) as usize;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        pos = skip_name(response, pos)? + 4;
    }

    let mut addresses = Vec::new();
    let mut min_ttl: Option<u32> = None;

    for _ in 0..ancount {
        pos = skip_name(response, pos)?;
        let fixed = response.get(pos..pos + 10)?;
        let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let class = u16::from_be_bytes([fixed[2], fixed[3]]);
        let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        pos += 10;
        let rdata = response.get(pos..pos + rdlength)?;
        pos += rdlength;

        if class != CLASS_IN || rtype != qtype.to_u16() {
            continue;
        }
        let address = match (qtype, rdata.len()) {
            (QueryType::A, 4) => IpAddr::from(<[u8; 4]>::try_from(rdata).ok()?),
            (QueryType::Aaaa, 16) => IpAddr::from(<[u8; 16]>::try_from(rdata).ok()?),
            _ => continue,
        };
        addresses.push(address);
        min_ttl = Some(min_ttl.map_or(ttl, |current| current.min(ttl)));
    }

    Some(AddressAnswers { addresses, min_ttl })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn query(id: u16, domain: &str, qtype: QueryType) -> Vec<u8> {
        build_query(id, domain, qtype)
    }

    #[test]
    fn parse_query() {
        let raw = query(0x1234, "Ads.Example.COM", QueryType::A);
        let parsed = DnsQuery::parse(&raw).unwrap();

        assert_eq!(parsed.id, 0x1234);
        assert_eq!(parsed.domain, "ads.example.com");
        assert_eq!(parsed.qtype, QueryType::A);
        assert_eq!(parsed.qclass, 1);
    }

    #[test]
    fn parse_unknown_type_is_kept() {
        let raw = query(1, "example.com", QueryType::Unknown(65));
        let parsed = DnsQuery::parse(&raw).unwrap();

        assert_eq!(parsed.qtype, QueryType::Unknown(65));
        assert_eq!(parsed.domain, "example.com");
    }

    #[test]
    fn parse_keeps_non_utf8_labels() {
        let mut raw = query(1, "example.com", QueryType::A);
        raw[HEADER_LEN + 1] = 0xE9;
        let parsed = DnsQuery::parse(&raw).unwrap();

        assert_eq!(parsed.domain, "\u{fffd}xample.com");
        assert_eq!(parsed.qtype, QueryType::A);
        assert_eq!(parsed.question_end, raw.len());
    }

    #[test]
    fn parse_rejects_truncated_input() {
        let raw = query(1, "example.com", QueryType::A);

        assert!(DnsQuery::parse(&raw[..11]).is_none());
        assert!(DnsQuery::parse(&raw[..HEADER_LEN + 4]).is_none());
        assert!(DnsQuery::parse(&raw[..raw.len() - 1]).is_none());
    }

    #[test]
    fn parse_rejects_compressed_question() {
        let mut raw = query(1, "a.b", QueryType::A)[..HEADER_LEN].to_vec();
        raw.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);

        assert!(DnsQuery::parse(&raw).is_none());
    }

    #[test]
    fn redirect_response_for_a() {
        let raw = query(0xBEEF, "ads.example.com", QueryType::A);
        let parsed = DnsQuery::parse(&raw).unwrap();
        let response =
            parsed.redirect_response(&raw, Ipv4Addr::new(10, 0, 0, 1), Ipv6Addr::LOCALHOST, 1);

        assert_eq!(&response[0..2], &[0xBE, 0xEF]);
        assert_eq!(&response[2..4], &[0x81, 0x80]);
        assert_eq!(&response[4..12], &[0, 1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&response[12..raw.len()], &raw[12..]);

        let answer = &response[raw.len()..];
        assert_eq!(&answer[0..2], &[0xC0, 0x0C]);
        assert_eq!(&answer[2..4], &[0x00, 0x01]);
        assert_eq!(&answer[4..6], &[0x00, 0x01]);
        assert_eq!(&answer[6..10], &1u32.to_be_bytes());
        assert_eq!(&answer[10..12], &[0x00, 0x04]);
        assert_eq!(&answer[12..], &[10, 0, 0, 1]);
    }

    #[test]
    fn redirect_response_for_aaaa_uses_ipv6() {
        let raw = query(7, "ads.example.com", QueryType::Aaaa);
        let parsed = DnsQuery::parse(&raw).unwrap();
        let ipv6: Ipv6Addr = "fd00::1".parse().unwrap();
        let response = parsed.redirect_response(&raw, Ipv4Addr::LOCALHOST, ipv6, 30);

        let answer = &response[raw.len()..];
        assert_eq!(&answer[2..4], &[0x00, 28]);
        assert_eq!(&answer[6..10], &30u32.to_be_bytes());
        assert_eq!(&answer[10..12], &[0x00, 16]);
        assert_eq!(&answer[12..], &ipv6.octets());
    }

    #[test]
    fn redirect_response_for_other_types_has_no_answer() {
        let raw = query(7, "portal.test", QueryType::Mx);
        let parsed = DnsQuery::parse(&raw).unwrap();
        let response = parsed.redirect_response(&raw, Ipv4Addr::LOCALHOST, Ipv6Addr::LOCALHOST, 30);

        assert_eq!(&response[6..8], &[0, 0]);
        assert_eq!(response.len(), raw.len());
    }

    #[test]
    fn redirect_response_drops_trailing_sections() {
        let mut raw = query(7, "portal.test", QueryType::A);
        raw[11] = 1; // ARCOUNT
        raw.extend_from_slice(&[0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 0]); // OPT
        let parsed = DnsQuery::parse(&raw).unwrap();
        let response = parsed.redirect_response(&raw, Ipv4Addr::LOCALHOST, Ipv6Addr::LOCALHOST, 30);

        assert_eq!(&response[10..12], &[0, 0]);
        assert_eq!(response.len(), raw.len() - 11 + 16);
    }

    #[test]
    fn error_response_is_header_only_servfail() {
        let raw = query(0x4242, "example.com", QueryType::A);
        let response = error_response(&raw);

        assert_eq!(response.len(), HEADER_LEN);
        assert_eq!(&response[0..2], &[0x42, 0x42]);
        assert_eq!(&response[2..4], &[0x81, 0x82]);
        assert!(response[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn error_response_for_short_request() {
        assert_eq!(error_response(&[0x12, 0x34, 0x01, 0x00, 0x00]), vec![0x12, 0x34, 0x81, 0x82, 0x00]);
        assert_eq!(error_response(&[0x12, 0x34]), vec![0x12, 0x34]);
        assert!(error_response(&[]).is_empty());
    }

    fn answer_record(out: &mut Vec<u8>, rtype: u16, ttl: u32, rdata: &[u8]) {
        out.extend_from_slice(&NAME_POINTER);
        out.extend_from_slice(&rtype.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&ttl.to_be_bytes());
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(rdata);
    }

    #[test]
    fn parse_address_answers_skips_cname() {
        let mut response = query(9, "www.example.com", QueryType::A);
        response[2..4].copy_from_slice(&FLAGS_RESPONSE_OK);
        response[7] = 3;
        answer_record(&mut response, 5, 600, &[3, b'c', b'd', b'n', 0xC0, 0x10]);
        answer_record(&mut response, 1, 120, &[93, 184, 216, 34]);
        answer_record(&mut response, 1, 60, &[93, 184, 216, 35]);

        let answers = parse_address_answers(&response, QueryType::A).unwrap();

        assert_eq!(
            answers.addresses,
            vec![
                "93.184.216.34".parse::<IpAddr>().unwrap(),
                "93.184.216.35".parse::<IpAddr>().unwrap(),
            ]
        );
        assert_eq!(answers.min_ttl, Some(60));
    }

    #[test]
    fn parse_address_answers_rejects_truncated_record() {
        let mut response = query(9, "www.example.com", QueryType::A);
        response[7] = 1;
        answer_record(&mut response, 1, 120, &[93, 184, 216, 34]);
        response.truncate(response.len() - 2);

        assert!(parse_address_answers(&response, QueryType::A).is_none());
    }
}
