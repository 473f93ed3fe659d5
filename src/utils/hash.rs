use std::io;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::SPOOL_COPY_BUFFER_SIZE;

/// Calculate the lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Calculate the lowercase hex SHA-256 of everything `reader` yields
pub async fn sha256_reader<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; SPOOL_COPY_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EMPTY_PAYLOAD_SHA256;

    #[test]
    fn test_empty_hash_constant() {
        assert_eq!(sha256_hex(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_reader_matches_slice() {
        let data = vec![42u8; 3 * SPOOL_COPY_BUFFER_SIZE + 17];
        let mut reader = &data[..];
        assert_eq!(sha256_reader(&mut reader).await.unwrap(), sha256_hex(&data));
    }
}
