use strum::EnumCount;

// -------------------------------------------------------------------------------------------------

/// Groups of interaction inputs, as exposed to authoring tools.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::VariantNames,
)]
#[repr(u8)]
pub enum InputGroup {
    Blank,
    Spatial,
    Collision,
    Temporal,
}

// -------------------------------------------------------------------------------------------------

/// Interaction scalars an emitter's parameters can be modulated by.
///
/// Values are fed by external collaborators (physics, scene) every tick via
/// [`Engine::set_emitter_input`](crate::Engine::set_emitter_input), except for
/// `DistanceToListener`, which the engine calculates on its own.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
    strum::EnumCount,
    strum::EnumIter,
)]
#[repr(u8)]
pub enum InteractionInput {
    /// No input: always 0.
    #[default]
    Blank,
    Speed,
    Mass,
    Scale,
    DistanceToListener,
    DistanceToOther,
    CollisionForce,
    CollisionSpeed,
    RollingSpeed,
    SlidingSpeed,
    /// Seconds since the emitter's frame got spawned.
    Age,
    /// Age relative to the frame's life time, 0..1.
    NormalizedAge,
}

impl InteractionInput {
    const SPATIAL: [Self; 5] = [
        Self::Speed,
        Self::Mass,
        Self::Scale,
        Self::DistanceToListener,
        Self::DistanceToOther,
    ];
    const COLLISION: [Self; 4] = [
        Self::CollisionForce,
        Self::CollisionSpeed,
        Self::RollingSpeed,
        Self::SlidingSpeed,
    ];
    const TEMPORAL: [Self; 2] = [Self::Age, Self::NormalizedAge];

    /// Resolve an input from a `(group, selector)` pair. Returns `None` when the selector is out
    /// of range for the given group.
    pub fn from_group_selector(group: InputGroup, selector: usize) -> Option<Self> {
        match group {
            InputGroup::Blank => (selector == 0).then_some(Self::Blank),
            InputGroup::Spatial => Self::SPATIAL.get(selector).copied(),
            InputGroup::Collision => Self::COLLISION.get(selector).copied(),
            InputGroup::Temporal => Self::TEMPORAL.get(selector).copied(),
        }
    }

    /// The group this input belongs to.
    pub fn group(&self) -> InputGroup {
        match self {
            Self::Blank => InputGroup::Blank,
            Self::Speed
            | Self::Mass
            | Self::Scale
            | Self::DistanceToListener
            | Self::DistanceToOther => InputGroup::Spatial,
            Self::CollisionForce
            | Self::CollisionSpeed
            | Self::RollingSpeed
            | Self::SlidingSpeed => InputGroup::Collision,
            Self::Age | Self::NormalizedAge => InputGroup::Temporal,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Latest interaction values of a single emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionValues {
    values: [f32; InteractionInput::COUNT],
}

impl Default for InteractionValues {
    fn default() -> Self {
        Self {
            values: [0.0; InteractionInput::COUNT],
        }
    }
}

impl InteractionValues {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, input: InteractionInput) -> f32 {
        self.values[input as usize]
    }

    /// Set a new input value. Writes to [`InteractionInput::Blank`] are ignored and non finite
    /// values are stored as 0.
    #[inline]
    pub fn set(&mut self, input: InteractionInput, value: f32) {
        if input != InteractionInput::Blank {
            self.values[input as usize] = if value.is_finite() { value } else { 0.0 };
        }
    }
}

// -------------------------------------------------------------------------------------------------
