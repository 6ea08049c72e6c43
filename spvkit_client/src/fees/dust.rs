use spvkit_protocol::{value::Satoshis, ScriptType};

use super::size::TransactionSizeCalculator;

/// Computes the smallest output value worth creating for each script type.
///
/// An output is dust when spending it would cost more than a fixed share of its value
/// at the dust relay fee rate. The threshold is the cost, at that rate, of creating the
/// output plus the cost of the input that will later spend it.
#[derive(Clone, Copy, Debug)]
pub struct DustCalculator {
    dust_relay_fee_rate: u64,
    size_calculator: TransactionSizeCalculator,
}

impl DustCalculator {
    pub fn new(dust_relay_fee_rate: u64, size_calculator: TransactionSizeCalculator) -> Self {
        DustCalculator {
            dust_relay_fee_rate,
            size_calculator,
        }
    }

    pub fn dust(&self, script_type: ScriptType) -> Satoshis {
        let size = self.size_calculator.output_size(script_type)
            + self.size_calculator.input_vsize(script_type);
        Satoshis::from_u64(size.saturating_mul(self.dust_relay_fee_rate))
            .unwrap_or(Satoshis::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use spvkit_protocol::{value::Satoshis, ScriptType};

    use super::DustCalculator;
    use crate::fees::size::TransactionSizeCalculator;

    #[test]
    fn standard_thresholds() {
        let calc = DustCalculator::new(3, TransactionSizeCalculator);
        assert_eq!(calc.dust(ScriptType::P2pkh), Satoshis::const_from_u64(546));
        assert_eq!(calc.dust(ScriptType::P2wpkh), Satoshis::const_from_u64(297));
        assert!(calc.dust(ScriptType::P2tr) > calc.dust(ScriptType::P2wpkh));
    }
}
