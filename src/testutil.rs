//! Certificate and key fixtures for unit tests.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Self-signed certificate for `common_name` expiring at `not_after`.
pub fn certificate_pem(common_name: &str, not_after: i64) -> String {
    let key = ec_key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}

pub fn rsa_private_key_pem() -> String {
    let rsa = Rsa::generate(2048).unwrap();
    String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap()
}

pub fn ec_private_key_pem() -> String {
    String::from_utf8(ec_key().private_key_to_pem_pkcs8().unwrap()).unwrap()
}
