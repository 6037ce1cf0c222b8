use crate::types::errors::FibError;
use crate::types::AddressFamily;

// The multiplier of the multiplicative part of the prefix hash.
const HASH_MULT: u32 = 2_902_958_171;

//------------ PrefixId ------------------------------------------------------

#[derive(
    Hash,
    Eq,
    PartialEq,
    Debug,
    Copy,
    Clone,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
    zerocopy::Unaligned,
)]
#[repr(C)]
pub struct PrefixId<AF: AddressFamily> {
    len: u8,
    net: AF,
}

impl<AF: AddressFamily> PrefixId<AF> {
    pub fn new(net: AF, len: u8) -> Self {
        PrefixId { len, net }
    }

    pub(crate) fn zero() -> Self {
        PrefixId {
            len: 0,
            net: <AF as AddressFamily>::zero(),
        }
    }

    pub fn get_net(&self) -> AF {
        self.net
    }

    pub fn get_len(&self) -> u8 {
        self.len
    }

    /// The 32-bit hash of this prefix. A property of the prefix alone: it
    /// never changes when the table holding it resizes.
    pub fn hash(&self) -> u32 {
        self.net.fold_u32().wrapping_mul(HASH_MULT)
            ^ ((self.len as u32) << 26)
    }

    /// The position of this prefix in the split-ordered list: the
    /// bit-reversed hash. Under this ordering any power-of-two bucketing
    /// has stable boundaries, so a growing table never moves nodes.
    pub(crate) fn order_key(&self) -> u32 {
        self.hash().reverse_bits()
    }

    /// Drop the last bit of the prefix: the next candidate in a
    /// longest-prefix-match descent.
    pub(crate) fn shorten(self) -> Self {
        let len = self.len - 1;
        Self {
            net: self.net.truncate_to_len(len),
            len,
        }
    }

    pub fn truncate_to_len(self, len: u8) -> Self {
        Self {
            net: self.net.truncate_to_len(len),
            len,
        }
    }
}

impl<AF: AddressFamily> TryFrom<inetnum::addr::Prefix> for PrefixId<AF> {
    type Error = FibError;

    fn try_from(value: inetnum::addr::Prefix) -> Result<Self, Self::Error> {
        // An address of the wrong family has the wrong number of octets
        // for AF and fails the byte-level conversion.
        let net = match value.addr() {
            std::net::IpAddr::V4(addr) => {
                let octets = addr.octets();
                AF::try_read_from_bytes(&octets)
                    .map_err(|_| FibError::AddressFamilyMismatch)?
            }
            std::net::IpAddr::V6(addr) => {
                let octets = addr.octets();
                AF::try_read_from_bytes(&octets)
                    .map_err(|_| FibError::AddressFamilyMismatch)?
            }
        };

        Ok(Self {
            net,
            len: value.len(),
        })
    }
}

impl<AF: AddressFamily> From<PrefixId<AF>> for inetnum::addr::Prefix {
    fn from(value: PrefixId<AF>) -> Self {
        Self::new(value.get_net().into_ipaddr(), value.get_len()).unwrap()
    }
}

impl<AF: AddressFamily> std::fmt::Display for PrefixId<AF> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.net.into_ipaddr(), self.len)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use inetnum::addr::Prefix;

    use super::*;
    use crate::types::af::{IPv4, IPv6};

    #[test]
    fn hash_depends_on_len() {
        let a = PrefixId::<IPv4>::new(0x0A00_0000_u32.into(), 8);
        let b = PrefixId::<IPv4>::new(0x0A00_0000_u32.into(), 9);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.hash());
    }

    #[test]
    fn order_key_is_bit_reversed_hash() {
        let a = PrefixId::<IPv4>::new(0xC0A8_0000_u32.into(), 16);
        assert_eq!(a.order_key().reverse_bits(), a.hash());
    }

    #[test]
    fn shorten_clears_trailing_bit() {
        let a = PrefixId::<IPv4>::new(0xC0A8_0100_u32.into(), 24);
        let s = a.shorten();
        assert_eq!(s.get_len(), 23);
        assert_eq!(u32::from(s.get_net()), 0xC0A8_0000);
    }

    #[test]
    fn from_prefix_checks_family() {
        let v4 = Prefix::from_str("121.155.218.0/24").unwrap();
        let v6 = Prefix::from_str("2001:db8::/32").unwrap();

        let id = PrefixId::<IPv4>::try_from(v4).unwrap();
        assert_eq!(u32::from(id.get_net()), 2040257024);
        assert_eq!(id.get_len(), 24);
        assert_eq!(Prefix::from(id), v4);

        assert_eq!(
            PrefixId::<IPv4>::try_from(v6),
            Err(FibError::AddressFamilyMismatch)
        );
        assert!(PrefixId::<IPv6>::try_from(v6).is_ok());
        assert_eq!(
            PrefixId::<IPv6>::try_from(v4),
            Err(FibError::AddressFamilyMismatch)
        );
    }
}
