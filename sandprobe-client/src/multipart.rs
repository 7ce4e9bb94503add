use bytes::{BufMut, Bytes, BytesMut};
use rand::{Rng, distr::Alphanumeric};

use crate::form::FormData;

const BOUNDARY_LENGTH: usize = 32;

/// An encoded `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Multipart {
    pub boundary: String,
    pub body: Bytes,
}

impl Multipart {
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

pub fn encode(form: &FormData) -> Multipart {
    // ensure the boundary does not occur in any value
    let boundary = loop {
        let boundary: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LENGTH)
            .map(char::from)
            .collect();
        let boundary = format!("----sandprobe{boundary}");

        if form
            .iter()
            .all(|(name, value)| !name.contains(&boundary) && !value.contains(&boundary))
        {
            break boundary;
        }
    };

    let body = encode_with_boundary(form, &boundary);
    Multipart { boundary, body }
}

fn encode_with_boundary(form: &FormData, boundary: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(
        form.iter()
            .map(|(n, v)| n.len() + v.len() + boundary.len() + 64)
            .sum::<usize>()
            + boundary.len()
            + 8,
    );

    for (name, value) in form.iter() {
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"\r\nContent-Disposition: form-data; name=\"");
        body.put_slice(escape_name(name).as_bytes());
        body.put_slice(b"\"\r\n\r\n");
        body.put_slice(value.as_bytes());
        body.put_slice(b"\r\n");
    }
    body.put_slice(b"--");
    body.put_slice(boundary.as_bytes());
    body.put_slice(b"--\r\n");

    body.freeze()
}

/// Percent-encodes the characters that would break out of the quoted name.
fn escape_name(name: &str) -> String {
    name.replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
