/*!
 * Static GPIO / physical-pin cross reference for the 40-pin header.
 *
 * Physical pins are 1-indexed (entry 0 is unused); GPIO numbers follow the
 * BCM scheme. The tables are process-lifetime constants used for
 * introspection and setup snapshots only, never for dispatch.
 */

/// Signal name per physical pin, 1-indexed; index 0 unused
pub const PINS: [&str; 41] = [
    "",
    "+3V3",                          // 1
    "+5V",                           // 2
    "GPIO_2 I2C1:SDA",               // 3
    "+5V",                           // 4
    "GPIO_3 I2C1:SCL",               // 5
    "GND",                           // 6
    "GPIO_4 1-Wire",                 // 7
    "GPIO_14 UART0:TXD",             // 8
    "GND",                           // 9
    "GPIO_15 UART0:RXD",             // 10
    "GPIO_17",                       // 11
    "GPIO_18 PW0 I2S:CLK",           // 12
    "GPIO_27",                       // 13
    "GND",                           // 14
    "GPIO_22",                       // 15
    "GPIO_23",                       // 16
    "+3V3",                          // 17
    "GPIO_24",                       // 18
    "GPIO_10 SPI0:MOSI",             // 19
    "GND",                           // 20
    "GPIO_9 SPI0:MISO",              // 21
    "GPIO_25",                       // 22
    "GPIO_11 SPI0:CLK",              // 23
    "GPIO_8 SPI0:CE0",               // 24
    "GND",                           // 25
    "GPIO_7 SPI0:CE1",               // 26
    "EEPROM I2C:SDA",                // 27
    "EEPROM I2C:SCL",                // 28
    "GPIO_5",                        // 29
    "GND",                           // 30
    "GPIO_6",                        // 31
    "GPIO_12 PW0",                   // 32
    "GPIO_13 PW1",                   // 33
    "GND",                           // 34
    "GPIO_19 PW1 SPI1:MISO I2S:WS",  // 35
    "GPIO_16 SPI1:CE0",              // 36
    "GPIO_26",                       // 37
    "GPIO_20 SPI1:MOSI I2S:DIN",     // 38
    "GND",                           // 39
    "GPIO_21 SPI1:CLK I2S:DOUT",     // 40
];

/// Physical pin per BCM gpio number (0 = not on the header)
pub const GPIO_PINS: [u8; 28] = [
    0, 0, 3, 5, 7, 29, 31, 26, 24, 21, 19, 23, 32, 33, 8, 10, 36, 11, 12, 35, 38, 40, 15, 16, 18,
    22, 37, 13,
];

/// BCM gpio number per physical pin (0 = power/ground/reserved), 1-indexed
pub const PIN_GPIOS: [u8; 41] = [
    0, //
    0, 0, 2, 0, 3, 0, 4, 14, 0, 15, //  1..10
    17, 18, 27, 0, 22, 23, 0, 24, 10, 0, // 11..20
    9, 25, 11, 8, 0, 7, 0, 0, 5, 0, // 21..30
    6, 12, 13, 0, 19, 16, 26, 20, 0, 21, // 31..40
];

/// Signal name of a physical pin (1..=40)
pub fn pin_label(pin: u8) -> &'static str {
    PINS.get(pin as usize).copied().unwrap_or("")
}

/// Physical pin carrying the given BCM gpio, if it is on the header
pub fn pin_for_gpio(gpio: u8) -> Option<u8> {
    match GPIO_PINS.get(gpio as usize) {
        Some(0) | None => None,
        Some(&pin) => Some(pin),
    }
}

/// BCM gpio at the given physical pin, if any
pub fn gpio_at_pin(pin: u8) -> Option<u8> {
    match PIN_GPIOS.get(pin as usize) {
        Some(0) | None => None,
        Some(&gpio) => Some(gpio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_consistent() {
        // every gpio that maps to a pin must map back to itself
        for gpio in 0..GPIO_PINS.len() as u8 {
            if let Some(pin) = pin_for_gpio(gpio) {
                assert_eq!(gpio_at_pin(pin), Some(gpio), "gpio {} via pin {}", gpio, pin);
                assert!(
                    pin_label(pin).starts_with(&format!("GPIO_{}", gpio)),
                    "pin {} label {:?}",
                    pin,
                    pin_label(pin)
                );
            }
        }
    }

    #[test]
    fn test_shape() {
        assert_eq!(PINS.len(), 41);
        assert_eq!(PIN_GPIOS.len(), 41);
        assert_eq!(PINS[0], "");
        assert_eq!(pin_label(1), "+3V3");
        assert_eq!(pin_label(40), "GPIO_21 SPI1:CLK I2S:DOUT");
    }

    #[test]
    fn test_well_known_pins() {
        assert_eq!(pin_for_gpio(18), Some(12)); // PWM0
        assert_eq!(pin_for_gpio(2), Some(3)); // I2C SDA
        assert_eq!(pin_for_gpio(10), Some(19)); // SPI0 MOSI
        assert_eq!(gpio_at_pin(6), None); // GND
    }
}
