//! Simulated current-weather lookup.
//!
//! Values are random but stay inside fixed ranges: temperature 5..=29,
//! humidity 30..=79, wind 1..=10 m/s, feels-like within ±2 of the
//! temperature, high/low 2..=6 degrees above/below it.

use rand::seq::SliceRandom;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DESCRIPTION: &str =
    "특정 도시의 현재 날씨 정보를 가져옵니다. 사용자가 날씨에 대해 물어볼 때 이 도구를 사용하세요.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    Rainy,
    Snowy,
    PartlyCloudy,
    Windy,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 6] = [
        WeatherCondition::Sunny,
        WeatherCondition::Cloudy,
        WeatherCondition::Rainy,
        WeatherCondition::Snowy,
        WeatherCondition::PartlyCloudy,
        WeatherCondition::Windy,
    ];
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WeatherInput {
    /// 날씨를 확인할 도시 이름 (예: 서울, 부산, 도쿄)
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeatherOutput {
    pub location: String,
    pub temperature: i32,
    pub condition: WeatherCondition,
    pub humidity: i32,
    pub wind_speed: i32,
    pub feels_like: i32,
    pub high: i32,
    pub low: i32,
}

pub fn execute(input: WeatherInput) -> WeatherOutput {
    let mut rng = rand::thread_rng();
    let temperature = rng.gen_range(5..30);
    let condition = *WeatherCondition::ALL
        .choose(&mut rng)
        .unwrap_or(&WeatherCondition::Sunny);

    WeatherOutput {
        location: input.location,
        temperature,
        condition,
        humidity: rng.gen_range(30..80),
        wind_speed: rng.gen_range(1..=10),
        feels_like: temperature + rng.gen_range(-2..=2),
        high: temperature + rng.gen_range(2..=6),
        low: temperature - rng.gen_range(2..=6),
    }
}
