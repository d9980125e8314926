use rand::RngCore;

/// A fully built `multipart/form-data` request body.
#[derive(Clone, Debug)]
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    /// Start an empty body with a random boundary.
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self::with_boundary(format!("caption-relay-{}", suffix))
    }

    pub fn with_boundary(boundary: String) -> Self {
        Self {
            boundary,
            body: Vec::new(),
        }
    }

    /// Append a file part.
    pub fn file(mut self, field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.open_part();
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: {}\r\n\r\n",
                escape_quotes(field),
                escape_quotes(filename),
                content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Close the body. Returns the `Content-Type` header value and the bytes.
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }

    fn open_part(&mut self) {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_part_layout() {
        let (content_type, body) = MultipartBody::with_boundary("XYZ".to_string())
            .file("file", "frame.jpg", "image/jpeg", b"JPEG")
            .finish();

        assert_eq!(content_type, "multipart/form-data; boundary=XYZ");
        let expected = "--XYZ\r\n\
                        Content-Disposition: form-data; name=\"file\"; filename=\"frame.jpg\"\r\n\
                        Content-Type: image/jpeg\r\n\r\n\
                        JPEG\r\n\
                        --XYZ--\r\n";
        assert_eq!(String::from_utf8(body).unwrap(), expected);
    }

    #[test]
    fn random_boundaries_differ() {
        let (a, _) = MultipartBody::new().finish();
        let (b, _) = MultipartBody::new().finish();
        assert_ne!(a, b);
    }
}
