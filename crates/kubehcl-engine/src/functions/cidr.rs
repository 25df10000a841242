//! IP network functions for IPv4 and IPv6 CIDR prefixes

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use kubehcl_core::Value;

use super::{Args, FnResult, FunctionError, Functions};

/// An address widened to 128 bits plus the width of its family
#[derive(Debug, Clone, Copy, PartialEq)]
struct Prefix {
    network: u128,
    len: u32,
    bits: u32,
}

impl Prefix {
    fn host_bits(&self) -> u32 {
        self.bits - self.len
    }

    fn size(&self) -> u128 {
        1u128.checked_shl(self.host_bits()).unwrap_or(0)
    }

    fn contains(&self, addr: u128) -> bool {
        mask(addr, self.len, self.bits) == self.network
    }

    fn render(&self) -> String {
        format!("{}/{}", render_addr(self.network, self.bits), self.len)
    }
}

fn mask(addr: u128, len: u32, bits: u32) -> u128 {
    let host_bits = bits - len;
    if host_bits >= 128 {
        return 0;
    }
    addr & !((1u128 << host_bits) - 1)
}

fn parse_addr(text: &str) -> Option<(u128, u32)> {
    match text.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some((u32::from(v4) as u128, 32)),
        IpAddr::V6(v6) => Some((u128::from(v6), 128)),
    }
}

fn render_addr(addr: u128, bits: u32) -> String {
    if bits == 32 {
        Ipv4Addr::from(addr as u32).to_string()
    } else {
        Ipv6Addr::from(addr).to_string()
    }
}

fn parse_prefix(text: &str, index: usize) -> Result<Prefix, FunctionError> {
    let invalid = |message: String| FunctionError::Argument { index, message };
    let (addr, len) = text
        .split_once('/')
        .ok_or_else(|| invalid(format!("invalid CIDR address: {}", text)))?;
    let (addr, bits) =
        parse_addr(addr).ok_or_else(|| invalid(format!("invalid CIDR address: {}", text)))?;
    let len: u32 = len
        .parse()
        .ok()
        .filter(|l| *l <= bits)
        .ok_or_else(|| invalid(format!("invalid CIDR address: {}", text)))?;
    Ok(Prefix {
        network: mask(addr, len, bits),
        len,
        bits,
    })
}

fn subnet(base: &Prefix, newbits: i64, netnum: i64) -> Result<Prefix, FunctionError> {
    if newbits < 0 {
        return Err(FunctionError::failed("newbits must not be negative"));
    }
    let new_len = base.len + newbits as u32;
    if new_len > base.bits {
        return Err(FunctionError::failed(format!(
            "insufficient address space to extend prefix of {} by {}",
            base.len, newbits
        )));
    }
    let max_netnum = 1u128.checked_shl(newbits as u32).unwrap_or(u128::MAX);
    if netnum < 0 || netnum as u128 >= max_netnum {
        return Err(FunctionError::failed(format!(
            "prefix extension of {} does not accommodate a subnet numbered {}",
            newbits, netnum
        )));
    }
    let shift = base.bits - new_len;
    let offset = (netnum as u128).checked_shl(shift).unwrap_or(0);
    Ok(Prefix {
        network: base.network | offset,
        len: new_len,
        bits: base.bits,
    })
}

/// Usage: cidrhost("10.0.0.0/24", 5)
pub(crate) fn cidrhost(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let prefix = parse_prefix(&a.string(0)?, 1)?;
    let hostnum = a.integer(1)?;
    let size = prefix.size();
    let offset = if hostnum < 0 {
        size.checked_sub(hostnum.unsigned_abs() as u128)
    } else if size == 0 || (hostnum as u128) < size {
        Some(hostnum as u128)
    } else {
        None
    }
    .ok_or_else(|| {
        FunctionError::failed(format!(
            "prefix of {} bits cannot accommodate a host numbered {}",
            prefix.host_bits(),
            hostnum
        ))
    })?;
    Ok(Value::string(render_addr(
        prefix.network + offset,
        prefix.bits,
    )))
}

/// Usage: cidrnetmask("10.0.0.0/12")
pub(crate) fn cidrnetmask(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 1)?;
    let prefix = parse_prefix(&a.string(0)?, 1)?;
    if prefix.bits != 32 {
        return Err(FunctionError::failed(
            "IPv6 addresses cannot have a netmask",
        ));
    }
    let netmask = mask(u32::MAX as u128, prefix.len, 32);
    Ok(Value::string(render_addr(netmask, 32)))
}

/// Usage: cidrsubnet("10.0.0.0/16", 8, 2)
pub(crate) fn cidrsubnet(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 3)?;
    let prefix = parse_prefix(&a.string(0)?, 1)?;
    let out = subnet(&prefix, a.integer(1)?, a.integer(2)?)?;
    Ok(Value::string(out.render()))
}

/// Usage: cidrsubnets("10.0.0.0/16", 4, 4, 8)
pub(crate) fn cidrsubnets(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::at_least(args, 1)?;
    let base = parse_prefix(&a.string(0)?, 1)?;
    let end = base.network + base.size().wrapping_sub(1);
    let mut next = base.network;
    let mut out = Vec::new();

    for i in 1..a.len() {
        let newbits = a.integer(i)?;
        if newbits < 1 {
            return Err(FunctionError::Argument {
                index: i + 1,
                message: "must extend prefix by at least one bit".to_string(),
            });
        }
        let len = base.len + newbits as u32;
        if len > base.bits {
            return Err(FunctionError::Argument {
                index: i + 1,
                message: format!("would extend prefix to {} bits, which is too long", len),
            });
        }
        let size = 1u128 << (base.bits - len);
        let start = next.div_ceil(size) * size;
        if start < next || start > end || start + (size - 1) > end {
            return Err(FunctionError::Argument {
                index: i + 1,
                message: "not enough remaining address space for a subnet with a prefix of that length"
                    .to_string(),
            });
        }
        out.push(Value::string(
            Prefix {
                network: start,
                len,
                bits: base.bits,
            }
            .render(),
        ));
        next = start + size;
    }
    Ok(Value::List(out))
}

/// Usage: cidrcontains("10.0.0.0/8", "10.1.2.3")
pub(crate) fn cidrcontains(_: &Functions, args: &[Value]) -> FnResult {
    let a = Args::exact(args, 2)?;
    let container = parse_prefix(&a.string(0)?, 1)?;
    let inner = a.string(1)?;
    let (addr, bits, len) = if inner.contains('/') {
        let p = parse_prefix(&inner, 2)?;
        (p.network, p.bits, p.len)
    } else {
        let (addr, bits) = parse_addr(&inner).ok_or_else(|| FunctionError::Argument {
            index: 2,
            message: format!("invalid IP address: {}", inner),
        })?;
        (addr, bits, bits)
    };
    if bits != container.bits {
        return Err(FunctionError::failed(
            "address family of the prefix and the address must match",
        ));
    }
    Ok(Value::Bool(len >= container.len && container.contains(addr)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    #[test]
    fn test_cidrhost() {
        assert_eq!(call("cidrhost", vec![s("10.12.112.0/20"), n(16.0)]), s("10.12.112.16"));
        assert_eq!(call("cidrhost", vec![s("10.12.112.0/20"), n(-2.0)]), s("10.12.127.254"));
        assert_eq!(
            call("cidrhost", vec![s("fd00:fd12:3456:7890::/56"), n(16.0)]),
            s("fd00:fd12:3456:7800::10")
        );
        call_err("cidrhost", vec![s("10.0.0.0/30"), n(4.0)]);
    }

    #[test]
    fn test_cidrnetmask() {
        assert_eq!(call("cidrnetmask", vec![s("172.16.0.0/12")]), s("255.240.0.0"));
        call_err("cidrnetmask", vec![s("fd00::/8")]);
    }

    #[test]
    fn test_cidrsubnet() {
        assert_eq!(
            call("cidrsubnet", vec![s("172.16.0.0/12"), n(4.0), n(2.0)]),
            s("172.18.0.0/16")
        );
        assert_eq!(
            call("cidrsubnet", vec![s("10.1.2.0/24"), n(4.0), n(15.0)]),
            s("10.1.2.240/28")
        );
        assert_eq!(
            call("cidrsubnet", vec![s("fd00:fd12:3456:7890::/56"), n(16.0), n(162.0)]),
            s("fd00:fd12:3456:7800:a200::/72")
        );
        call_err("cidrsubnet", vec![s("10.0.0.0/24"), n(2.0), n(4.0)]);
    }

    #[test]
    fn test_cidrsubnets() {
        assert_eq!(
            call("cidrsubnets", vec![s("10.1.0.0/16"), n(4.0), n(4.0), n(8.0), n(4.0)]),
            list(vec![
                s("10.1.0.0/20"),
                s("10.1.16.0/20"),
                s("10.1.32.0/24"),
                s("10.1.48.0/20"),
            ])
        );
        call_err("cidrsubnets", vec![s("10.0.0.0/30"), n(1.0), n(1.0), n(1.0)]);
    }

    #[test]
    fn test_cidrcontains() {
        assert_eq!(
            call("cidrcontains", vec![s("10.0.0.0/8"), s("10.1.2.3")]),
            kubehcl_core::Value::Bool(true)
        );
        assert_eq!(
            call("cidrcontains", vec![s("10.0.0.0/8"), s("10.1.0.0/16")]),
            kubehcl_core::Value::Bool(true)
        );
        assert_eq!(
            call("cidrcontains", vec![s("10.0.0.0/16"), s("10.0.0.0/8")]),
            kubehcl_core::Value::Bool(false)
        );
        call_err("cidrcontains", vec![s("10.0.0.0/8"), s("::1")]);
    }
}
