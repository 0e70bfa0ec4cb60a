//! Cross-boundary value marking.
//!
//! Values handed to the other side of the host boundary are either copied
//! (serialized by value) or proxied (the transport keeps the object on this
//! side and forwards calls to it). Which one is decided by an explicit tag
//! set when the value is created, never by inspecting its type.

/// Marker stored on a value at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyTag {
    must_proxy: bool,
}

impl ProxyTag {
    /// Tag for values that must be proxied across the boundary.
    pub const fn must_proxy() -> Self {
        Self { must_proxy: true }
    }

    /// Tag for plain data that may be copied.
    pub const fn by_value() -> Self {
        Self { must_proxy: false }
    }

    pub fn is_proxy(self) -> bool {
        self.must_proxy
    }
}

/// How the transport should move a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Proxy,
}

impl From<ProxyTag> for TransferMode {
    fn from(tag: ProxyTag) -> Self {
        if tag.is_proxy() {
            TransferMode::Proxy
        } else {
            TransferMode::Copy
        }
    }
}

/// Implemented by values that carry a [`ProxyTag`].
pub trait ProxyValue {
    fn proxy_tag(&self) -> ProxyTag;

    fn transfer_mode(&self) -> TransferMode {
        self.proxy_tag().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Handle {
        tag: ProxyTag,
    }

    impl ProxyValue for Handle {
        fn proxy_tag(&self) -> ProxyTag {
            self.tag
        }
    }

    #[test]
    fn test_transfer_mode_follows_tag() {
        let proxied = Handle {
            tag: ProxyTag::must_proxy(),
        };
        let copied = Handle {
            tag: ProxyTag::by_value(),
        };

        assert_eq!(proxied.transfer_mode(), TransferMode::Proxy);
        assert_eq!(copied.transfer_mode(), TransferMode::Copy);
        assert_eq!(ProxyTag::default(), ProxyTag::by_value());
    }
}
