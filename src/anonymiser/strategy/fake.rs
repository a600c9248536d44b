//! Fake strategy - generate realistic fake data.

use super::{Strategy, StrategyKind};
use crate::database::Value;
use chrono::{NaiveDate, NaiveTime};
use fake::faker::address::en::{CityName, CountryName, StateName, StreetName, ZipCode};
use fake::faker::company::en::{CompanyName, Profession};
use fake::faker::internet::en::{SafeEmail, Username};
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Strategy that generates fake data.
///
/// Date and time generators keep the column's type when the source value
/// is already typed, so a `DATE` column stays a `DATE` in the dump.
#[derive(Debug, Clone)]
pub struct FakeStrategy {
    generator: String,
}

impl FakeStrategy {
    pub fn new(generator: String) -> Self {
        Self {
            generator: generator.to_lowercase(),
        }
    }

    fn generate(&self, original: &Value, rng: &mut StdRng) -> Value {
        match self.generator.as_str() {
            "date" => {
                let date = random_date(rng);
                match original {
                    Value::Date(_) => Value::Date(date),
                    _ => Value::Text(date.format("%Y-%m-%d").to_string()),
                }
            }
            "datetime" | "date_time" => {
                let ts = random_date(rng).and_time(random_time(rng));
                match original {
                    Value::Timestamp(_) => Value::Timestamp(ts),
                    _ => Value::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                }
            }
            "time" => {
                let t = random_time(rng);
                match original {
                    Value::Time(_) => Value::Time(t),
                    _ => Value::Text(t.format("%H:%M:%S").to_string()),
                }
            }
            _ => Value::Text(self.generate_text(rng)),
        }
    }

    fn generate_text(&self, rng: &mut StdRng) -> String {
        match self.generator.as_str() {
            "name" | "full_name" => Name().fake_with_rng(rng),
            "first_name" => FirstName().fake_with_rng(rng),
            "last_name" => LastName().fake_with_rng(rng),

            "email" | "safe_email" => SafeEmail().fake_with_rng(rng),
            "phone" | "phone_number" => PhoneNumber().fake_with_rng(rng),
            "username" | "user_name" => Username().fake_with_rng(rng),

            "address" | "street_address" => {
                let street: String = StreetName().fake_with_rng(rng);
                let city: String = CityName().fake_with_rng(rng);
                let state: String = StateName().fake_with_rng(rng);
                let zip: String = ZipCode().fake_with_rng(rng);
                format!("{}, {}, {} {}", street, city, state, zip)
            }
            "street" | "street_name" => StreetName().fake_with_rng(rng),
            "city" => CityName().fake_with_rng(rng),
            "state" => StateName().fake_with_rng(rng),
            "zip" | "zip_code" | "postal_code" => ZipCode().fake_with_rng(rng),
            "country" => CountryName().fake_with_rng(rng),

            "company" | "company_name" => CompanyName().fake_with_rng(rng),
            "job_title" => Profession().fake_with_rng(rng),

            "url" => format!(
                "https://example{}.com/{}",
                rng.random_range(1..1000),
                Word().fake_with_rng::<String, _>(rng)
            ),
            "ip" | "ip_address" | "ipv4" => format!(
                "{}.{}.{}.{}",
                rng.random_range(1..255),
                rng.random_range(0..255),
                rng.random_range(0..255),
                rng.random_range(1..255)
            ),
            "ipv6" => (0..8)
                .map(|_| format!("{:x}", rng.random::<u16>()))
                .collect::<Vec<_>>()
                .join(":"),

            "uuid" => format!(
                "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                rng.random::<u32>(),
                rng.random::<u16>(),
                (rng.random::<u16>() & 0x0FFF) | 0x4000,
                (rng.random::<u16>() & 0x3FFF) | 0x8000,
                rng.random::<u64>() & 0xFFFF_FFFF_FFFF
            ),

            "credit_card" => format!(
                "{:04}-{:04}-{:04}-{:04}",
                rng.random_range(1000..10000),
                rng.random_range(1000..10000),
                rng.random_range(1000..10000),
                rng.random_range(1000..10000)
            ),
            "iban" => format!(
                "DE{:02}{:04}{:04}{:04}{:04}{:02}",
                rng.random_range(10..100),
                rng.random_range(1000..10000),
                rng.random_range(1000..10000),
                rng.random_range(1000..10000),
                rng.random_range(1000..10000),
                rng.random_range(10..100)
            ),
            "ssn" => format!(
                "{:03}-{:02}-{:04}",
                rng.random_range(100..1000),
                rng.random_range(10..100),
                rng.random_range(1000..10000)
            ),

            "lorem" | "paragraph" => Paragraph(3..5).fake_with_rng(rng),
            "sentence" => Sentence(5..10).fake_with_rng(rng),
            "word" => Word().fake_with_rng(rng),

            _ => format!("FAKE_{}", rng.random_range(10000..100000)),
        }
    }
}

fn random_date(rng: &mut StdRng) -> NaiveDate {
    let year = rng.random_range(1970..2024);
    let month = rng.random_range(1..=12);
    let day = rng.random_range(1..=28);
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn random_time(rng: &mut StdRng) -> NaiveTime {
    NaiveTime::from_hms_opt(
        rng.random_range(0..24),
        rng.random_range(0..60),
        rng.random_range(0..60),
    )
    .unwrap_or_default()
}

impl Strategy for FakeStrategy {
    fn apply(&self, value: &Value, rng: &mut dyn rand::RngCore) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        // fake's generators want a sized Rng
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let mut fake_rng = StdRng::from_seed(seed);
        self.generate(value, &mut fake_rng)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Fake {
            generator: self.generator.clone(),
        }
    }
}
