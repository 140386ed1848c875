#![allow(dead_code)]

use axum::Router;
use crl_monitor::issuer::{IssuerCertificate, IssuerNameId};
use rcgen::{
    Certificate, CertificateParams, CertificateRevocationList, CertificateRevocationListParams,
    CrlDistributionPoint, CrlIssuingDistributionPoint, CrlScope, DistinguishedName, DnType,
    KeyIdMethod, KeyUsagePurpose, RevokedCertParams, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use tokio::net::TcpListener;
use x509_parser::num_bigint::BigUint;

pub const BUCKET: &str = "crls";

/// A throwaway CA able to sign certificates and CRLs
pub struct TestIssuer {
    pub ca: Certificate,
    pub issuer: IssuerCertificate,
}

impl TestIssuer {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new());
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::CrlSign, KeyUsagePurpose::KeyCertSign];
        let ca = Certificate::from_params(params).unwrap();
        let issuer = IssuerCertificate::from_der(ca.serialize_der().unwrap()).unwrap();
        Self { ca, issuer }
    }

    pub fn name_id(&self) -> IssuerNameId {
        self.issuer.name_id
    }

    /// Object path of a shard of this issuer
    pub fn object(&self, shard: u32) -> String {
        format!("{}/{shard}.crl", self.name_id())
    }

    /// A signed CRL revoking `serials`, all revoked an hour before `this_update`
    pub fn crl(&self, idp: &str, number: u64, this_update: OffsetDateTime, serials: &[u64]) -> Vec<u8> {
        let params = CertificateRevocationListParams {
            this_update,
            next_update: this_update + Duration::hours(24),
            crl_number: SerialNumber::from_slice(&BigUint::from(number).to_bytes_be()),
            issuing_distribution_point: Some(CrlIssuingDistributionPoint {
                distribution_point: CrlDistributionPoint {
                    uris: vec![idp.to_string()],
                },
                scope: Some(CrlScope::UserCertsOnly),
            }),
            revoked_certs: serials
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: serial_number(*serial),
                    revocation_time: this_update - Duration::hours(1),
                    reason_code: None,
                    invalidity_date: None,
                })
                .collect(),
            alg: &rcgen::PKCS_ECDSA_P256_SHA256,
            key_identifier_method: KeyIdMethod::Sha256,
        };
        CertificateRevocationList::from_params(params)
            .unwrap()
            .serialize_der_with_signer(&self.ca)
            .unwrap()
    }

    /// A leaf certificate signed by this issuer
    pub fn leaf(&self, serial: u64, crl_distribution_point: Option<&str>) -> Vec<u8> {
        let mut params = CertificateParams::new(vec!["leaf.example".to_string()]);
        params.serial_number = Some(serial_number(serial));
        params.crl_distribution_points = crl_distribution_point
            .into_iter()
            .map(|uri| CrlDistributionPoint {
                uris: vec![uri.to_string()],
            })
            .collect();
        Certificate::from_params(params)
            .unwrap()
            .serialize_der_with_signer(&self.ca)
            .unwrap()
    }
}

pub fn serial_number(serial: u64) -> SerialNumber {
    SerialNumber::from_slice(&BigUint::from(serial).to_bytes_be())
}

pub fn serial_bytes(serial: u64) -> Vec<u8> {
    BigUint::from(serial).to_bytes_be()
}

/// Current time with the sub-second part dropped, as CRLs encode it
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc().replace_nanosecond(0).unwrap()
}

// Serve `router` on a random local port and return its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("failed to run server");
    });
    format!("http://127.0.0.1:{port}")
}
